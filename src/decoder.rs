// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Decoders turn the raw bytes of one capture file into a text blob of
//! 5-line read groups (see `pore_read_iter`). The signal-level decoding itself
//! lives outside this crate: `CommandDecoder` delegates it to an external
//! program, and `TextDecoder` accepts input that has already been decoded.

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::string::FromUtf8Error;
use std::thread;

use thiserror::Error;

/// Errors from decoding a single capture file. All of them are local to that
/// file: the batch skips the file and carries on.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("decoder produced no sequences")]
    Empty,

    #[error("decoded blob is not valid UTF-8")]
    InvalidUtf8(#[from] FromUtf8Error),

    #[error("decoder program '{0}' not found")]
    NotFound(String),

    #[error("i/o error running decoder '{program}'")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("decoder '{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Decode one capture file. Implementations are shared by all worker threads
/// of a batch and must be fully initialized before the first call.
pub trait Decoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<String, DecodeError>;
    fn description(&self) -> String;
}

/// Treats the input bytes as an already-decoded blob.
#[derive(Clone, Copy, Default, Debug)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    fn decode(&self, raw: &[u8]) -> Result<String, DecodeError> {
        Ok(String::from_utf8(raw.to_vec())?)
    }

    fn description(&self) -> String {
        "text".to_string()
    }
}

/// Runs an external decoder per capture file. The raw bytes are written to
/// the program's stdin and the blob is read from its stdout; a non-zero exit
/// status is a decode failure.
#[derive(Clone, Debug)]
pub struct CommandDecoder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDecoder {
    /// Resolve `program` (a path, or a name looked up on `PATH`) once, up front.
    pub fn new(program: &str, args: Vec<String>) -> Result<CommandDecoder, DecodeError> {
        let program =
            resolve_program(program).ok_or_else(|| DecodeError::NotFound(program.to_string()))?;
        Ok(CommandDecoder { program, args })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Decoder for CommandDecoder {
    fn decode(&self, raw: &[u8]) -> Result<String, DecodeError> {
        let io_err = |source| DecodeError::Io {
            program: self.program_name(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(io_err)?;

        let stdin = child.stdin.take();

        // feed stdin from a second thread so a chatty decoder can't deadlock on a full stdout pipe
        let (written, output) = thread::scope(|s| {
            let writer = s.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(raw),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "stdin writer panicked",
                ))
            });
            (written, output)
        });

        let output = output.map_err(io_err)?;
        if !output.status.success() {
            return Err(DecodeError::Failed {
                program: self.program_name(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // a decoder that exits cleanly without reading all of its input is fine
        if let Err(e) = written {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(io_err(e));
            }
        }

        Ok(String::from_utf8(output.stdout)?)
    }

    fn description(&self) -> String {
        let mut desc = self.program_name();
        for arg in &self.args {
            desc.push(' ');
            desc.push_str(arg);
        }
        desc
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return if path.is_file() {
            Some(path.to_path_buf())
        } else {
            None
        };
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

/// Serializable description of the decoder a batch should use.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
#[serde(tag = "type")]
pub enum DecoderDef {
    Text,
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for DecoderDef {
    fn default() -> Self {
        DecoderDef::Text
    }
}

impl DecoderDef {
    /// Initialize the decoder. Called once per batch, before any file is
    /// dispatched to the workers.
    pub fn build(&self) -> Result<Box<dyn Decoder>, DecodeError> {
        match self {
            DecoderDef::Text => Ok(Box::new(TextDecoder)),
            DecoderDef::Command { program, args } => {
                Ok(Box::new(CommandDecoder::new(program, args.clone())?))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const BLOB: &[u8] = b"run1-te\nreadA\nACGT\n+\n!!!!\n";

    #[test]
    fn test_text_decoder() {
        assert_eq!(
            TextDecoder.decode(BLOB).unwrap(),
            String::from_utf8(BLOB.to_vec()).unwrap()
        );
        assert_eq!(TextDecoder.decode(b"").unwrap(), "");
        assert!(matches!(
            TextDecoder.decode(&[0xff, 0xfe, b'\n']),
            Err(DecodeError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_missing_program() {
        let res = CommandDecoder::new("/nonexistent/dir/pore-decoder", vec![]);
        assert!(matches!(res, Err(DecodeError::NotFound(_))));

        let res = CommandDecoder::new("no-such-pore-decoder-on-path", vec![]);
        assert!(matches!(res, Err(DecodeError::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_decoder() {
        let cat = CommandDecoder::new("cat", vec![]).unwrap();
        assert_eq!(cat.decode(BLOB).unwrap().as_bytes(), BLOB);

        // larger than a pipe buffer in both directions
        let big = BLOB.repeat(20_000);
        assert_eq!(cat.decode(&big).unwrap().len(), big.len());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_decoder_failure() {
        let sh = CommandDecoder::new(
            "sh",
            vec!["-c".to_string(), "echo corrupt capture >&2; exit 3".to_string()],
        )
        .unwrap();

        match sh.decode(BLOB) {
            Err(DecodeError::Failed { stderr, status, .. }) => {
                assert_eq!(stderr, "corrupt capture");
                assert_eq!(status.code(), Some(3));
            }
            other => panic!("expected decode failure, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_def_json() {
        let def: DecoderDef = serde_json::from_str(r#"{"type": "Text"}"#).unwrap();
        assert_eq!(def, DecoderDef::Text);

        let def: DecoderDef =
            serde_json::from_str(r#"{"type": "Command", "program": "sh", "args": ["-c", "cat"]}"#)
                .unwrap();
        assert_eq!(
            def,
            DecoderDef::Command {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "cat".to_string()],
            }
        );

        assert_eq!(DecoderDef::default().build().unwrap().description(), "text");
    }
}
