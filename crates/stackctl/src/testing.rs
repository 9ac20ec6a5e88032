//! In-memory CloudFormation, S3 and STS for stateful engine tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stackctl_common::AimdConfig;
use stackctl_common::defaults::NAME_PREFIX;

use crate::aws::{
    AccountId, AwsError, ClientBundle, CloudFormationOperations, IdentityOperations,
    RemoteClients, SessionCache, SessionFactory, StagingOperations,
};
use crate::cleanup::CleanupRegistry;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::model::{
    ChangesetDescription, CreateChangesetInput, CreatedChangeset, ResourceChange, StackEvent,
    StackEventsPage, StackSnapshot,
};
use crate::stack::{ChangesetOptions, PipelineOptions};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

#[derive(Default)]
struct FakeChangeset {
    description: ChangesetDescription,
    /// Statuses reported by successive describe calls; the last one sticks
    script: VecDeque<String>,
}

#[derive(Default)]
struct State {
    /// Stack name or id -> matching stacks (more than one simulates ambiguity)
    stacks: HashMap<String, Vec<StackSnapshot>>,
    /// Statuses reported by successive describe-stacks calls
    stack_scripts: HashMap<String, VecDeque<String>>,
    throttle_describes: usize,
    describe_error: Option<AwsError>,
    /// Describe-stacks calls never return
    hang_describes: bool,

    changesets: HashMap<String, FakeChangeset>,
    next_changeset_statuses: VecDeque<String>,
    next_changeset_reason: Option<String>,
    next_changeset_changes: Vec<ResourceChange>,
    /// Create calls that fail with AlreadyExists before one succeeds
    create_conflicts: usize,
    create_error: Option<AwsError>,
    created: Vec<CreateChangesetInput>,
    deleted_changesets: Vec<(String, Option<String>)>,
    throttle_changeset_describes: usize,

    executed: Vec<(String, String)>,
    cancelled: Vec<String>,
    /// Cancel-update calls never return
    hang_cancel_updates: bool,
    deleted_stacks: Vec<(String, String)>,

    /// Newest first
    events: Vec<StackEvent>,
    page_size: usize,
    throttle_events: usize,
    events_error: Option<AwsError>,
    event_calls: usize,

    buckets: HashSet<String>,
    objects: HashMap<(String, String), Vec<u8>>,
    deleted_objects: Vec<(String, String)>,
    bucket_creates: usize,

    identity_calls: usize,
}

/// Shared fake backend. Clones observe the same state.
#[derive(Clone)]
pub struct FakeCloud {
    state: Arc<Mutex<State>>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                page_size: 3,
                ..State::default()
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// A bundle whose every client is this fake
    pub fn bundle(&self) -> Arc<ClientBundle> {
        self.bundle_with_cleanup(CleanupRegistry::new())
    }

    pub fn bundle_with_cleanup(&self, cleanup: CleanupRegistry) -> Arc<ClientBundle> {
        Arc::new(ClientBundle::new("", self.remote_clients(), cleanup))
    }

    pub fn remote_clients(&self) -> RemoteClients {
        RemoteClients {
            region: REGION.to_string(),
            cloudformation: Arc::new(self.clone()),
            staging: Arc::new(self.clone()),
            identity: Arc::new(self.clone()),
        }
    }

    /// Engine whose every session is this fake, with short poll intervals
    pub fn engine(&self) -> Engine {
        let sessions = SessionCache::new(Arc::new(self.clone()), CleanupRegistry::new());
        Engine::new(sessions)
            .with_changeset_options(ChangesetOptions {
                aimd: AimdConfig::with_min(Duration::from_millis(10)),
                ..ChangesetOptions::default()
            })
            .with_pipeline_options(PipelineOptions {
                stack_poll_interval: Duration::from_millis(10),
                events: AimdConfig::with_min(Duration::from_millis(10)),
            })
    }

    // ---- stacks ----

    pub fn put_stack(&self, name: &str, status: &str) {
        let mut snapshot = StackSnapshot::absent(name);
        snapshot.stack_id = Some(stack_id(name));
        snapshot.status = status.to_string();
        let mut state = self.state();
        state.stacks.insert(name.to_string(), vec![snapshot.clone()]);
        state.stacks.insert(stack_id(name), vec![snapshot]);
    }

    /// Make describe-stacks for `name` return `count` copies
    pub fn duplicate_stack(&self, name: &str, count: usize) {
        let mut state = self.state();
        let Some(first) = state.stacks.get(name).and_then(|s| s.first()).cloned() else {
            return;
        };
        let copies = vec![first; count];
        state.stacks.insert(name.to_string(), copies.clone());
        state.stacks.insert(stack_id(name), copies);
    }

    /// Statuses the stack moves through on successive describes
    pub fn script_stack(&self, name: &str, statuses: &[&str]) {
        let script: VecDeque<String> = statuses.iter().map(|s| s.to_string()).collect();
        let mut state = self.state();
        state.stack_scripts.insert(name.to_string(), script.clone());
        state.stack_scripts.insert(stack_id(name), script);
    }

    pub fn throttle_describes(&self, n: usize) {
        self.state().throttle_describes = n;
    }

    pub fn hang_describes(&self) {
        self.state().hang_describes = true;
    }

    pub fn fail_describes(&self, err: AwsError) {
        self.state().describe_error = Some(err);
    }

    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.state()
            .stacks
            .get(name)
            .and_then(|s| s.first())
            .map(|s| s.status.clone())
    }

    // ---- changesets ----

    /// Statuses the next created changeset reports on successive describes
    pub fn script_next_changeset(&self, statuses: &[&str], reason: Option<&str>) {
        let mut state = self.state();
        state.next_changeset_statuses = statuses.iter().map(|s| s.to_string()).collect();
        state.next_changeset_reason = reason.map(String::from);
    }

    pub fn next_changeset_changes(&self, changes: Vec<ResourceChange>) {
        self.state().next_changeset_changes = changes;
    }

    pub fn conflict_on_create(&self, n: usize) {
        self.state().create_conflicts = n;
    }

    pub fn fail_create(&self, err: AwsError) {
        self.state().create_error = Some(err);
    }

    pub fn throttle_changeset_describes(&self, n: usize) {
        self.state().throttle_changeset_describes = n;
    }

    pub fn created(&self) -> Vec<CreateChangesetInput> {
        self.state().created.clone()
    }

    pub fn deleted_changesets(&self) -> Vec<(String, Option<String>)> {
        self.state().deleted_changesets.clone()
    }

    pub fn executed(&self) -> Vec<(String, String)> {
        self.state().executed.clone()
    }

    pub fn hang_cancel_updates(&self) {
        self.state().hang_cancel_updates = true;
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state().cancelled.clone()
    }

    pub fn deleted_stacks(&self) -> Vec<(String, String)> {
        self.state().deleted_stacks.clone()
    }

    // ---- events ----

    /// Append an event as the newest in the history
    pub fn push_event(&self, event: StackEvent) {
        self.state().events.insert(0, event);
    }

    pub fn set_page_size(&self, size: usize) {
        self.state().page_size = size.max(1);
    }

    pub fn throttle_events(&self, n: usize) {
        self.state().throttle_events = n;
    }

    pub fn fail_events(&self, err: AwsError) {
        self.state().events_error = Some(err);
    }

    pub fn event_calls(&self) -> usize {
        self.state().event_calls
    }

    // ---- staging ----

    pub fn add_bucket(&self, bucket: &str) {
        self.state().buckets.insert(bucket.to_string());
    }

    pub fn buckets(&self) -> Vec<String> {
        let mut buckets: Vec<_> = self.state().buckets.iter().cloned().collect();
        buckets.sort();
        buckets
    }

    pub fn bucket_creates(&self) -> usize {
        self.state().bucket_creates
    }

    pub fn objects(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.state().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn deleted_objects(&self) -> Vec<(String, String)> {
        self.state().deleted_objects.clone()
    }

    pub fn identity_calls(&self) -> usize {
        self.state().identity_calls
    }
}

pub fn stack_id(name: &str) -> String {
    if name.starts_with("arn:") {
        return name.to_string();
    }
    format!("arn:aws:cloudformation:{REGION}:{ACCOUNT}:stack/{name}/0000")
}

/// An event for `stack` with the given id and token
pub fn event(stack: &str, id: &str, status: &str, token: Option<&str>) -> StackEvent {
    StackEvent {
        event_id: id.to_string(),
        stack_id: stack_id(stack),
        stack_name: stack.to_string(),
        logical_resource_id: stack.to_string(),
        physical_resource_id: Some(stack_id(stack)),
        resource_type: "AWS::CloudFormation::Stack".to_string(),
        resource_status: status.to_string(),
        status_reason: None,
        client_request_token: token.map(String::from),
        timestamp: None,
    }
}

fn not_found(what: &str) -> AwsError {
    AwsError::NotFound {
        message: format!("{what} does not exist"),
    }
}

#[async_trait]
impl SessionFactory for FakeCloud {
    async fn connect(&self, _profile: &str, _region: &str) -> Result<RemoteClients, EngineError> {
        Ok(self.remote_clients())
    }
}

#[async_trait]
impl CloudFormationOperations for FakeCloud {
    async fn describe_stacks(&self, stack: &str) -> Result<Vec<StackSnapshot>, AwsError> {
        let hang = self.state().hang_describes;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if state.throttle_describes > 0 {
            state.throttle_describes -= 1;
            return Err(AwsError::Throttled);
        }
        if let Some(err) = state.describe_error.clone() {
            return Err(err);
        }

        let next = state.stack_scripts.get_mut(stack).and_then(|script| {
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        });
        if let Some(status) = next {
            // Keep name and id lookups in step
            let name = state
                .stacks
                .get(stack)
                .and_then(|s| s.first())
                .map(|s| s.stack_name.clone());
            if let Some(name) = name {
                for key in [name.clone(), stack_id(&name)] {
                    if key != stack {
                        if let Some(script) = state.stack_scripts.get_mut(&key) {
                            if script.len() > 1 {
                                script.pop_front();
                            }
                        }
                    }
                    if let Some(stacks) = state.stacks.get_mut(&key) {
                        for s in stacks.iter_mut() {
                            s.status = status.clone();
                        }
                    }
                }
            }
        }

        state
            .stacks
            .get(stack)
            .cloned()
            .ok_or_else(|| not_found(&format!("Stack with id {stack}")))
    }

    async fn create_change_set(
        &self,
        input: CreateChangesetInput,
    ) -> Result<CreatedChangeset, AwsError> {
        let mut state = self.state();
        state.created.push(input.clone());
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        if state.create_conflicts > 0 {
            state.create_conflicts -= 1;
            return Err(AwsError::AlreadyExists {
                message: format!("ChangeSet {} already exists", input.changeset_name),
            });
        }

        let id = format!(
            "arn:aws:cloudformation:{REGION}:{ACCOUNT}:changeSet/{}/{}",
            input.changeset_name,
            state.created.len()
        );
        let sid = stack_id(&input.stack_name);

        // Creating a changeset for a new stack leaves a placeholder behind
        if !state.stacks.contains_key(&input.stack_name) {
            let mut snapshot = StackSnapshot::absent(&input.stack_name);
            snapshot.stack_id = Some(sid.clone());
            snapshot.status = "REVIEW_IN_PROGRESS".to_string();
            state
                .stacks
                .insert(input.stack_name.clone(), vec![snapshot.clone()]);
            state.stacks.insert(sid.clone(), vec![snapshot]);
        }

        let mut script = std::mem::take(&mut state.next_changeset_statuses);
        if script.is_empty() {
            script.push_back("CREATE_COMPLETE".to_string());
        }
        let changeset = FakeChangeset {
            description: ChangesetDescription {
                id: id.clone(),
                name: input.changeset_name.clone(),
                stack_id: sid.clone(),
                stack_name: input.stack_name.clone(),
                status: "CREATE_PENDING".to_string(),
                status_reason: state.next_changeset_reason.take(),
                description: input.description.clone(),
                changes: std::mem::take(&mut state.next_changeset_changes),
                parameters: Vec::new(),
            },
            script,
        };
        state.changesets.insert(id.clone(), changeset);

        Ok(CreatedChangeset { id, stack_id: sid })
    }

    async fn delete_change_set(
        &self,
        change_set: &str,
        stack: Option<String>,
    ) -> Result<(), AwsError> {
        let mut state = self.state();
        state
            .deleted_changesets
            .push((change_set.to_string(), stack.clone()));
        let before = state.changesets.len();
        state
            .changesets
            .retain(|id, cs| id != change_set && cs.description.name != change_set);
        if state.changesets.len() == before && stack.is_none() {
            return Err(AwsError::NotFound {
                message: format!("ChangeSet [{change_set}] does not exist"),
            });
        }
        Ok(())
    }

    async fn describe_change_set(
        &self,
        change_set: &str,
    ) -> Result<ChangesetDescription, AwsError> {
        let mut state = self.state();
        if state.throttle_changeset_describes > 0 {
            state.throttle_changeset_describes -= 1;
            return Err(AwsError::Throttled);
        }
        let cs = state
            .changesets
            .get_mut(change_set)
            .ok_or_else(|| not_found(&format!("ChangeSet {change_set}")))?;
        let status = if cs.script.len() > 1 {
            cs.script.pop_front()
        } else {
            cs.script.front().cloned()
        };
        if let Some(status) = status {
            cs.description.status = status;
        }
        Ok(cs.description.clone())
    }

    async fn execute_change_set(
        &self,
        change_set: &str,
        client_token: &str,
    ) -> Result<(), AwsError> {
        let mut state = self.state();
        if !state.changesets.contains_key(change_set) {
            return Err(not_found(&format!("ChangeSet {change_set}")));
        }
        state
            .executed
            .push((change_set.to_string(), client_token.to_string()));
        Ok(())
    }

    async fn cancel_update_stack(&self, stack: &str) -> Result<(), AwsError> {
        let hang = {
            let mut state = self.state();
            state.cancelled.push(stack.to_string());
            state.hang_cancel_updates
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn delete_stack(&self, stack: &str, client_token: &str) -> Result<(), AwsError> {
        let mut state = self.state();
        state
            .deleted_stacks
            .push((stack.to_string(), client_token.to_string()));
        state.stacks.remove(stack);
        state.stacks.remove(&stack_id(stack));
        Ok(())
    }

    async fn describe_stack_events(
        &self,
        _stack: &str,
        next_token: Option<String>,
    ) -> Result<StackEventsPage, AwsError> {
        let mut state = self.state();
        state.event_calls += 1;
        if state.throttle_events > 0 {
            state.throttle_events -= 1;
            return Err(AwsError::Throttled);
        }
        if let Some(err) = state.events_error.clone() {
            return Err(err);
        }

        let start: usize = next_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + state.page_size).min(state.events.len());
        let events = state.events.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < state.events.len()).then(|| end.to_string());
        Ok(StackEventsPage { events, next_token })
    }
}

#[async_trait]
impl StagingOperations for FakeCloud {
    async fn create_bucket(&self, bucket: &str) -> Result<(), AwsError> {
        let mut state = self.state();
        state.bucket_creates += 1;
        if !state.buckets.insert(bucket.to_string()) {
            return Err(AwsError::AlreadyExists {
                message: format!("bucket {bucket} already owned by you"),
            });
        }
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<String, AwsError> {
        let mut state = self.state();
        if !state.buckets.contains(bucket) {
            return Err(AwsError::NotFound {
                message: format!("NoSuchBucket {bucket}"),
            });
        }
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(format!("https://{bucket}.s3.{REGION}.amazonaws.com/{key}"))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), AwsError> {
        let mut state = self.state();
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        state
            .deleted_objects
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[async_trait]
impl IdentityOperations for FakeCloud {
    async fn caller_account(&self) -> Result<AccountId, AwsError> {
        self.state().identity_calls += 1;
        Ok(AccountId::new(ACCOUNT))
    }
}

/// Name of the staging bucket the engine derives for the fake account
pub fn derived_bucket() -> String {
    format!("{NAME_PREFIX}-{ACCOUNT}-{REGION}")
}
