//! CLI utilities for driving an interpreter.
//!
//! The utilities in this module turn lines typed at a prompt into protocol calls and print
//! the outcomes that come back. They back the `eip-cli` binary but are independent of
//! any transport.
//!
//! # Example
//! ```rust
//! use eip_bridge::{Command, protocol::{Call, PathParams}};
//!
//! let cmd: Command = "path 0 3".try_into().unwrap();
//! assert_eq!(cmd, Command::Call(Call::GetPath(PathParams { source: 0, target: 3 })));
//! ```
use std::{
    fmt,
    io::{self, BufRead, Write},
    sync::Mutex,
};

use log::warn;
use serde_json::Value;
use thiserror::Error;

use crate::{
    Handler, lock,
    protocol::{
        Call, Edge, ExecuteParams, ExecuteResult, ExecutionTree, JumpResult, PathParams,
        Reference, ReferenceParams, Request, Response, RevertResult, TraceParams, Unattributable,
    },
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("failed to read command: {0}")]
    Io(#[from] io::Error),
}

/// Possible commands from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Request to send to the interpreter
    Call(Call),
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let line = value.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let call = match word {
            "" => return Err(CommandError::Empty),
            ".exit" => return Ok(Command::Exit),
            "execute" | "exec" => {
                if rest.is_empty() {
                    return Err(CommandError::InvalidArguments {
                        command: word.to_string(),
                        reason: "requires a program. Example: execute x = 1".to_string(),
                    });
                }
                Call::Execute(ExecuteParams {
                    program: rest.to_string(),
                })
            }
            "jump" => Call::Jump(ReferenceParams {
                reference: reference(word, rest)?,
            }),
            "revert" => Call::Revert(ReferenceParams {
                reference: reference(word, rest)?,
            }),
            "deref" => Call::Deref(ReferenceParams {
                reference: reference(word, rest)?,
            }),
            "tree" => Call::GetExecutionTree,
            "trace" => Call::GetTrace(TraceParams {
                reference: if rest.is_empty() {
                    None
                } else {
                    Some(reference(word, rest)?)
                },
            }),
            "path" => {
                let (source, target) = rest.split_once(' ').ok_or_else(|| {
                    CommandError::InvalidArguments {
                        command: word.to_string(),
                        reason: "requires a source and a target. Example: path 0 3".to_string(),
                    }
                })?;
                Call::GetPath(PathParams {
                    source: reference(word, source)?,
                    target: reference(word, target)?,
                })
            }
            "current" => Call::GetCurrentReference,
            "refs" => Call::GetAllReferences,
            "leaves" => Call::GetLeaves,
            _ => return Err(CommandError::UnrecognizedCommand(line.to_string())),
        };

        Ok(Command::Call(call))
    }
}

fn reference(command: &str, arg: &str) -> Result<Reference, CommandError> {
    arg.trim()
        .parse::<Reference>()
        .map_err(|_| CommandError::InvalidArguments {
            command: command.to_string(),
            reason: format!(
                "'{}' is not a reference; expected a non-negative integer",
                arg.trim()
            ),
        })
}

/// Prompt user for a command. End of input reads as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    s.as_str().try_into()
}

/// [`Handler`] that writes one line per outcome to `W`.
///
/// Each outcome takes the writer's lock only while its line is written, so output
/// from a serve thread interleaves with an idle prompt instead of waiting behind it.
pub struct PrintHandler<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> PrintHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn print(&self, line: fmt::Arguments<'_>) {
        let mut out = lock(&self.out);
        if let Err(e) = out.write_fmt(format_args!("{line}\n")).and_then(|_| out.flush()) {
            warn!("failed to print outcome: {e}");
        }
    }
}

fn edges(edges: &[Edge]) -> String {
    edges
        .iter()
        .map(|e| format!("\n  {} -[{}]-> {}", e.source, e.label.program, e.target))
        .collect()
}

impl<W: Write + Send> Handler for PrintHandler<W> {
    fn on_execute(&self, request: &Request, _: &ExecuteParams, result: ExecuteResult) {
        self.print(format_args!(
            "[{}] ref {}: {}",
            request.id, result.reference, result.output
        ));
    }

    fn on_jump(&self, request: &Request, params: &ReferenceParams, _: JumpResult) {
        self.print(format_args!("[{}] jumped to {}", request.id, params.reference));
    }

    fn on_revert(&self, request: &Request, params: &ReferenceParams, result: RevertResult) {
        self.print(format_args!(
            "[{}] reverted to {}, deleted {:?}",
            request.id, params.reference, result.deleted_references
        ));
    }

    fn on_deref(&self, request: &Request, params: &ReferenceParams, value: Value) {
        self.print(format_args!(
            "[{}] {} = {value}",
            request.id, params.reference
        ));
    }

    fn on_execution_tree(&self, request: &Request, tree: ExecutionTree) {
        self.print(format_args!(
            "[{}] current {}, references {:?}{}",
            request.id,
            tree.current,
            tree.references,
            edges(&tree.transitions)
        ));
    }

    fn on_trace(&self, request: &Request, _: &TraceParams, trace: Vec<Edge>) {
        self.print(format_args!("[{}] trace{}", request.id, edges(&trace)));
    }

    fn on_path(&self, request: &Request, params: &PathParams, path: Vec<Edge>) {
        self.print(format_args!(
            "[{}] path {} to {}{}",
            request.id,
            params.source,
            params.target,
            edges(&path)
        ));
    }

    fn on_current_reference(&self, request: &Request, reference: Reference) {
        self.print(format_args!("[{}] current reference {reference}", request.id));
    }

    fn on_all_references(&self, request: &Request, references: Vec<Reference>) {
        self.print(format_args!("[{}] references {references:?}", request.id));
    }

    fn on_leaves(&self, request: &Request, leaves: Vec<Reference>) {
        self.print(format_args!("[{}] leaves {leaves:?}", request.id));
    }

    fn on_error(&self, request: &Request, response: &Response) {
        match response.error() {
            Some(error) => self.print(format_args!(
                "[{}] {} failed: {error}",
                request.id,
                request.method()
            )),
            None => self.print(format_args!("[{}] {} failed", request.id, request.method())),
        }
    }

    fn on_unattributable(&self, failure: Unattributable) {
        match failure {
            Unattributable::Remote(response) => match response.error() {
                Some(error) => self.print(format_args!("interpreter error: {error}")),
                None => self.print(format_args!("interpreter error: {}", response.encode())),
            },
            Unattributable::Decode(e) => self.print(format_args!("bad response: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::{EdgeLabel, ErrorCode, RequestId, ResponseError};

    fn printed(f: impl FnOnce(&PrintHandler<Vec<u8>>)) -> String {
        let handler = PrintHandler::new(Vec::new());
        f(&handler);
        String::from_utf8(handler.into_inner()).unwrap()
    }

    #[test]
    fn command_from_string() {
        let inputs = vec![
            (".exit", Command::Exit),
            (
                "execute let x = 1",
                Command::Call(Call::Execute(ExecuteParams {
                    program: "let x = 1".into(),
                })),
            ),
            (
                "jump 5",
                Command::Call(Call::Jump(ReferenceParams { reference: 5 })),
            ),
            ("tree", Command::Call(Call::GetExecutionTree)),
            (
                "trace",
                Command::Call(Call::GetTrace(TraceParams { reference: None })),
            ),
            (
                "trace 2",
                Command::Call(Call::GetTrace(TraceParams { reference: Some(2) })),
            ),
            ("leaves", Command::Call(Call::GetLeaves)),
        ];

        for (cmd, expected) in inputs {
            let command: Command = cmd.try_into().unwrap();
            assert_eq!(command, expected);
        }
    }

    #[test]
    fn command_rejects_bad_reference() {
        let err = Command::try_from("revert -1").unwrap_err();
        assert!(matches!(err, CommandError::InvalidArguments { .. }));
    }

    #[test]
    fn command_path_needs_two_references() {
        assert!(Command::try_from("path 3").is_err());
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand")]
    fn command_unrecognized() {
        Command::try_from("fly away").unwrap();
    }

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let mut output = Vec::new();
        let res = prompt(&b""[..], &mut output).unwrap();

        assert_eq!(res, Command::Exit);
    }

    #[test]
    fn prompt_empty_line() {
        let mut output = Vec::new();
        let res = prompt(&b"\n"[..], &mut output);

        assert!(matches!(res, Err(CommandError::Empty)));
    }

    #[test]
    fn print_handler_formats_outcomes() {
        let refs = Request::new(RequestId::from(1), Call::GetAllReferences);
        let path = Request::new(
            RequestId::from(2),
            Call::GetPath(PathParams {
                source: 0,
                target: 1,
            }),
        );
        let edge = Edge {
            source: 0,
            target: 1,
            label: EdgeLabel {
                program: "x = 1".into(),
                mval: json!(null),
            },
        };

        let out = printed(|h| {
            h.on_all_references(&refs, vec![0, 1, 2]);
            h.on_path(
                &path,
                &PathParams {
                    source: 0,
                    target: 1,
                },
                vec![edge],
            );
        });

        assert_eq!(
            out,
            "[1] references [0, 1, 2]\n[2] path 0 to 1\n  0 -[x = 1]-> 1\n"
        );
    }

    #[test]
    fn print_handler_reports_errors() {
        let jump = Request::new(
            RequestId::from(4),
            Call::Jump(ReferenceParams { reference: 9 }),
        );
        let response = Response::failure(
            RequestId::from(4),
            ResponseError {
                code: ErrorCode::ReferenceNotInTree,
                message: "no such reference".into(),
                data: None,
            },
        );

        let out = printed(|h| h.on_error(&jump, &response));

        assert!(out.starts_with("[4] jump failed: "), "{out}");
        assert!(out.contains("no such reference"), "{out}");
    }
}
