//! Shell completion generation for rds-export
//!
//! This module generates completion scripts for bash, zsh and fish, with
//! entity-name completion for the `--entity` flag.

use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::CliArgs;
use crate::error::{ConfigError, ExportError, Result};
use crate::query::Entity;

const BIN_NAME: &str = "rds-export";

/// Generate shell completion script
///
/// # Arguments
/// * `shell_name` - Shell type (bash, zsh, fish)
///
/// # Returns
/// * `Result<()>` - Success or error
pub fn generate_completion(shell_name: &str) -> Result<()> {
    print!("{}", completion_script(shell_name)?);
    Ok(())
}

/// Build the completion script for `shell_name`
pub fn completion_script(shell_name: &str) -> Result<String> {
    let shell = parse_shell(shell_name)?;
    let base = base_completion(shell);
    let entities = entity_names();

    let script = match shell {
        Shell::Bash => format!(
            r#"{base}

# Complete entity names for --entity
_rds_export_enhanced() {{
    local cur prev
    cur="${{COMP_WORDS[COMP_CWORD]}}"
    prev="${{COMP_WORDS[COMP_CWORD-1]}}"

    if [[ "$prev" == "--entity" ]]; then
        COMPREPLY=($(compgen -W "{entities}" -- "$cur"))
        return 0
    fi

    _rds-export "$@"
}}

complete -F _rds_export_enhanced -o bashdefault -o default rds-export
"#
        ),
        Shell::Zsh => format!(
            r#"{base}

# Complete entity names for --entity
_rds_export_enhanced() {{
    if [[ ${{words[CURRENT-1]}} == "--entity" ]]; then
        local -a entities
        entities=({entities})
        _describe 'entities' entities
        return 0
    fi
    _rds-export "$@"
}}

compdef _rds_export_enhanced rds-export
"#
        ),
        Shell::Fish => format!(
            r#"{base}

# Complete entity names for --entity
complete -c rds-export -l entity -f -a "{entities}" -d "Entity to export"
"#
        ),
        _ => return Err(unsupported(shell_name)),
    };
    Ok(script)
}

fn base_completion(shell: Shell) -> String {
    let mut cmd = CliArgs::command();
    let mut buffer = Vec::new();
    generate(shell, &mut cmd, BIN_NAME, &mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

fn entity_names() -> String {
    Entity::ALL
        .iter()
        .map(|e| e.name())
        .collect::<Vec<_>>()
        .join(" ")
}

fn unsupported(shell_name: &str) -> ExportError {
    ExportError::Config(ConfigError::InvalidValue {
        field: "shell".to_string(),
        value: format!("{shell_name} (supported: bash, zsh, fish)"),
    })
}

/// Parse shell name string to Shell enum
fn parse_shell(shell_name: &str) -> Result<Shell> {
    match shell_name.to_lowercase().as_str() {
        "bash" => Ok(Shell::Bash),
        "zsh" => Ok(Shell::Zsh),
        "fish" => Ok(Shell::Fish),
        _ => Err(unsupported(shell_name)),
    }
}
