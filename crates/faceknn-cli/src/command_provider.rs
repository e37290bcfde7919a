//! Embedding provider backed by an external command.
//!
//! The image is written to the command's stdin as PNG. The command prints
//! a JSON array on stdout, one entry per face in detection order:
//!
//! ```text
//! [{"region": {"top": 10, "right": 90, "bottom": 110, "left": 20},
//!   "embedding": [0.013, -0.082, ...]}]
//! ```

use anyhow::{bail, Result};
use faceknn_core::{DetectedFace, EmbeddingProvider, ProviderError};
use image::{ImageFormat, RgbImage};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("embedding provider command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl EmbeddingProvider for CommandProvider {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ProviderError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ProviderError::Failed(format!("encoding image: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Failed("child stdin unavailable".into()))?;

        // Feed stdin from a separate thread so a chatty child cannot
        // deadlock on a full stdout pipe.
        let (output, written) = std::thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(&png));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            (output, written)
        });
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        // A successful child may stop reading stdin once it has what it needs.
        if let Err(e) = written {
            tracing::debug!(error = %e, "provider closed stdin early");
        }

        let faces: Vec<DetectedFace> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(program = %self.program, faces = faces.len(), "provider returned");
        Ok(faces)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use faceknn_core::FaceRegion;

    fn sh(script: &str) -> CommandProvider {
        CommandProvider::from_argv(&["sh".into(), "-c".into(), script.into()]).unwrap()
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]))
    }

    #[test]
    fn test_empty_argv_rejected() {
        assert!(CommandProvider::from_argv(&[]).is_err());
    }

    #[test]
    fn test_parses_faces_in_order() {
        let mut provider = sh(r#"cat >/dev/null; echo '[
            {"region": {"top": 1, "right": 9, "bottom": 8, "left": 2}, "embedding": [0.5, -0.25]},
            {"region": {"top": 0, "right": 4, "bottom": 4, "left": 0}, "embedding": [1.0, 0.0]}
        ]'"#);
        let faces = provider.detect_and_encode(&image()).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].region, FaceRegion::new(1, 9, 8, 2));
        assert_eq!(faces[0].embedding.values, vec![0.5, -0.25]);
        assert_eq!(faces[1].embedding.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_receives_png_on_stdin() {
        // PNG signature starts with 0x89 'P' 'N' 'G'.
        let mut provider = sh(r#"head -c 4 | tail -c 3 | grep -q PNG && echo '[]'"#);
        assert!(provider.detect_and_encode(&image()).unwrap().is_empty());
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let mut provider = sh("cat >/dev/null; echo 'model missing' >&2; exit 3");
        let err = provider.detect_and_encode(&image()).unwrap_err();
        match err {
            ProviderError::Failed(msg) => assert!(msg.contains("model missing"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage_output_is_decode_error() {
        let mut provider = sh("cat >/dev/null; echo 'faces: 2'");
        assert!(matches!(
            provider.detect_and_encode(&image()),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let mut provider =
            CommandProvider::from_argv(&["/nonexistent/faceknn-embed".into()]).unwrap();
        assert!(matches!(
            provider.detect_and_encode(&image()),
            Err(ProviderError::Io(_))
        ));
    }
}
