// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - External Tool Resolver
 * Shells out to subfinder, dnsx and alterx with deterministic
 * arguments and captures their newline-delimited stdout.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::Resolver;
use crate::errors::EnumError;

const SUBFINDER_CONFIG: &str = "./configs/subfinderconfig.yaml";
const SUBFINDER_PROVIDER_CONFIG: &str = "./configs/subfinderprovider-config.yaml";

/// Resolver backed by the real command-line tools
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandResolver;

async fn run_tool(tool: &str, args: Vec<String>) -> Result<Vec<String>, EnumError> {
    debug!(tool, ?args, "spawning enumeration tool");
    let output = Command::new(tool)
        .args(&args)
        .output()
        .await
        .map_err(|e| EnumError::Tool {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EnumError::Tool {
            tool: tool.to_string(),
            reason: format!("{} ({})", stderr.trim(), output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().map(|line| line.to_string()).collect())
}

#[async_trait]
impl Resolver for CommandResolver {
    async fn passive(&self, seed: &str) -> Result<Vec<String>, EnumError> {
        info!(seed, "running subfinder");
        run_tool(
            "subfinder",
            vec![
                "-d".to_string(),
                seed.to_string(),
                "-silent".to_string(),
                "-all".to_string(),
                "-config".to_string(),
                SUBFINDER_CONFIG.to_string(),
                "-pc".to_string(),
                SUBFINDER_PROVIDER_CONFIG.to_string(),
            ],
        )
        .await
    }

    async fn brute(
        &self,
        seed: &str,
        wordlist: &Path,
        threads: u32,
    ) -> Result<Vec<String>, EnumError> {
        info!(seed, "running DNS brute force");
        run_tool(
            "dnsx",
            vec![
                "-d".to_string(),
                seed.to_string(),
                "-silent".to_string(),
                "-w".to_string(),
                wordlist.display().to_string(),
                "-a".to_string(),
                "-cname".to_string(),
                "-aaaa".to_string(),
                "-t".to_string(),
                threads.to_string(),
            ],
        )
        .await
    }

    async fn permute(
        &self,
        seed: &str,
        input: &Path,
        output: &Path,
        threads: u32,
    ) -> Result<Vec<String>, EnumError> {
        info!(seed, "running DNS permutations");
        // alterx writes candidates to the output file; resolution of
        // the candidates happens in a second pass over that file
        run_tool(
            "alterx",
            vec![
                "-l".to_string(),
                input.display().to_string(),
                "-silent".to_string(),
                "-o".to_string(),
                output.display().to_string(),
            ],
        )
        .await?;

        self.resolve_file(output, threads).await
    }

    async fn resolve_file(&self, list: &Path, threads: u32) -> Result<Vec<String>, EnumError> {
        run_tool(
            "dnsx",
            vec![
                "-l".to_string(),
                list.display().to_string(),
                "-silent".to_string(),
                "-a".to_string(),
                "-cname".to_string(),
                "-aaaa".to_string(),
                "-t".to_string(),
                threads.to_string(),
            ],
        )
        .await
    }
}
