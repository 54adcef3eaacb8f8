//! Test fixtures for common values.

use std::path::Path;
use std::sync::Once;

use slb_approval::{CreateRequest, RegisterSession};
use slb_config::Config;
use slb_core::{Justification, SessionId};

/// Built-in configuration with the stock pattern sets.
///
/// # Panics
///
/// Panics if the embedded defaults do not parse.
#[must_use]
pub fn test_config() -> Config {
    Config::builtin().expect("embedded defaults parse")
}

/// Registration options for an agent session in `project`.
#[must_use]
pub fn test_registration(agent: &str, model: &str, project: &Path) -> RegisterSession {
    RegisterSession {
        agent_name: agent.to_string(),
        program: "test-harness".to_string(),
        model: model.to_string(),
        project_path: project.to_path_buf(),
        human: false,
    }
}

/// Creation options for `command`, run from `cwd`, with a filled-in
/// justification.
#[must_use]
pub fn test_create_request(session_id: SessionId, command: &str, cwd: &Path) -> CreateRequest {
    CreateRequest {
        session_id,
        command: command.to_string(),
        cwd: cwd.to_path_buf(),
        justification: Justification {
            reason: "clean build output".to_string(),
            expected_effect: "build directory removed".to_string(),
            goal: "fresh build".to_string(),
            safety_argument: "artifacts are reproducible".to_string(),
        },
        ..CreateRequest::default()
    }
}

static LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness. Honors `RUST_LOG`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
