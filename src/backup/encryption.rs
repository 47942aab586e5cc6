// dbvault/src/backup/encryption.rs
use std::path::Path;

use crate::config::Secret;
use crate::utils::tools::{ToolCommand, ToolError, ToolRunner};

const OPENSSL: &str = "openssl";
const KEY_ENV: &str = "DBVAULT_ENCRYPTION_KEY";

/// Symmetric encryption of whole archives through `openssl enc`.
///
/// The passphrase is handed over in the environment of the child process.
#[derive(Debug, Clone)]
pub struct Encryptor {
    key: Secret,
    tools: ToolRunner,
    program: &'static str,
}

impl Encryptor {
    pub fn new(key: Secret, tools: ToolRunner) -> Self {
        Self {
            key,
            tools,
            program: OPENSSL,
        }
    }

    /// Runs `program` in place of `openssl`.
    #[cfg(test)]
    pub fn with_program(mut self, program: &'static str) -> Self {
        self.program = program;
        self
    }

    fn command(&self, input: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(self.program)
            .arg("enc")
            .arg("-aes-256-cbc")
            .arg("-salt")
            .arg("-pbkdf2")
            .arg("-in")
            .arg(input)
            .arg("-out")
            .arg(output)
            .arg("-pass")
            .arg(format!("env:{KEY_ENV}"))
            .env(KEY_ENV, self.key.expose())
    }

    pub async fn encrypt(&self, plain: &Path, encrypted: &Path) -> Result<(), ToolError> {
        self.tools.run(&self.command(plain, encrypted)).await?;
        Ok(())
    }

    pub async fn decrypt(&self, encrypted: &Path, plain: &Path) -> Result<(), ToolError> {
        self.tools.run(&self.command(encrypted, plain).arg("-d")).await?;
        Ok(())
    }
}
