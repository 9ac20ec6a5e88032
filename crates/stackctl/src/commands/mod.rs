//! CLI subcommands
//!
//! Each command builds a serializable model and renders it either as
//! tables or, with `--json`, as one JSON document per model.

pub mod execute;
pub mod inspect;
pub mod status;

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RunConfig;
use crate::engine::Engine;
use crate::model::ChangesetRequest;
use crate::templates::TemplateFinder;

/// Shared state handed to every command
pub struct CommandContext {
    pub engine: Engine,
    pub finder: TemplateFinder,
    pub config: RunConfig,
    /// Cancelled when the command deadline passes
    pub cancel: CancellationToken,
}

impl CommandContext {
    pub fn new(engine: Engine, config: RunConfig) -> Self {
        Self {
            engine,
            finder: TemplateFinder::new(config.template_dir()),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Load the request for `(template, params)` with command-line overrides applied
    pub fn load_request(&self, template: &str, params: &str) -> Result<ChangesetRequest> {
        let mut request = self.finder.load(template, params)?;
        self.config.aws.apply(&mut request);
        debug!(
            template = %template,
            params = %params,
            stack = %request.stack_name,
            "Loaded parameter file"
        );
        Ok(request)
    }
}

/// Table rendering of a command model
pub trait HumanReadable {
    fn write_human(&self, out: &mut dyn Write) -> Result<()>;
}

/// Write `data` as JSON or as tables
pub fn display<T>(out: &mut dyn Write, json: bool, data: &T) -> Result<()>
where
    T: Serialize + HumanReadable + ?Sized,
{
    if json {
        serde_json::to_writer(&mut *out, data).context("Failed to encode JSON output")?;
        writeln!(out)?;
        return Ok(());
    }
    data.write_human(out)
}

/// A plain message, rendered verbatim or as a JSON string
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct Message(pub String);

impl HumanReadable for Message {
    fn write_human(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "{}", self.0)?;
        Ok(())
    }
}

pub(crate) fn new_table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.into_iter().map(|h| Cell::new(h.into())));
    table
}

/// A titled key/value table, or `<NONE>` when empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

pub(crate) fn write_key_values(out: &mut dyn Write, title: &str, rows: &[KeyValue]) -> Result<()> {
    writeln!(out, "{title}")?;
    if rows.is_empty() {
        writeln!(out, "<NONE>")?;
        return Ok(());
    }
    let mut table = new_table(["Key", "Value"]);
    for row in rows {
        table.add_row(vec![Cell::new(&row.key), Cell::new(&row.value)]);
    }
    writeln!(out, "{table}")?;
    Ok(())
}

/// Ask a yes/no question.
///
/// An empty answer asks again, up to `tries` times. Any answer whose first
/// character is `y` (case-insensitive) is a yes; end of input is a no.
pub fn confirm<R, W>(input: &mut R, out: &mut W, prompt: &str, tries: u32) -> bool
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    for _ in 0..tries {
        if write!(out, "{prompt} [y/n]: ").and_then(|()| out.flush()).is_err() {
            return false;
        }
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        let answer = line.trim().to_lowercase();
        if answer.is_empty() {
            continue;
        }
        return answer.starts_with('y');
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(input: &str) -> (bool, String) {
        let mut out = Vec::new();
        let yes = confirm(&mut Cursor::new(input), &mut out, "Execute", 3);
        (yes, String::from_utf8(out).unwrap())
    }

    #[test]
    fn confirm_accepts_y_prefix() {
        assert!(ask("y\n").0);
        assert!(ask("  Yes please\n").0);
        assert!(!ask("n\n").0);
        assert!(!ask("maybe\n").0);
    }

    #[test]
    fn confirm_retries_empty_answers() {
        let (yes, prompts) = ask("\n\ny\n");
        assert!(yes);
        assert_eq!(prompts.matches("Execute [y/n]: ").count(), 3);

        // Out of tries before the answer arrives
        assert!(!ask("\n\n\ny\n").0);
    }

    #[test]
    fn confirm_end_of_input_is_no() {
        assert!(!ask("").0);
    }

    #[test]
    fn empty_key_values_print_none() {
        let mut out = Vec::new();
        write_key_values(&mut out, "Outputs", &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Outputs\n<NONE>\n");
    }

    #[test]
    fn key_values_render_a_table() {
        let mut out = Vec::new();
        let rows = [KeyValue {
            key: "Env".into(),
            value: "prod".into(),
        }];
        write_key_values(&mut out, "Parameters", &rows).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Parameters\n"));
        assert!(text.contains("Env"));
        assert!(text.contains("prod"));
    }

    #[test]
    fn json_display_is_one_line() {
        let mut out = Vec::new();
        display(&mut out, true, &Message("no changes".into())).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\"no changes\"\n");

        let mut out = Vec::new();
        display(&mut out, false, &Message("no changes".into())).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "no changes\n");
    }
}
