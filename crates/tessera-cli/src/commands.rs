use std::sync::Arc;

use anyhow::Context as _;
use colored::Colorize;
use tessera_core::{Node, NodeConfig};
use tessera_pool::InProcessConnector;
use tessera_wal::{EventKind, Mutation};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Log(LogArgs {
            action: LogAction::Dump { dir },
        }) => cmd_log_dump(&dir),
        Command::Config(ConfigArgs {
            action: ConfigAction::Init,
        }) => {
            print!("{}", NodeConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        // Peers register with the in-process connector; there is no network transport.
        let node = Node::start(config, Arc::new(InProcessConnector::new())).await?;
        println!(
            "{} Tessera node running ({} shard(s), data in {})",
            "✓".green().bold(),
            node.router().pool().len(),
            node.config().data_dir.display().to_string().bold()
        );
        for line in node.router().servers() {
            println!("  {}", line.cyan());
        }

        tokio::signal::ctrl_c().await?;
        println!("Shutting down...");
        node.shutdown().await?;
        println!("{} Stopped.", "✓".green());
        anyhow::Ok(())
    })
}

fn cmd_log_dump(dir: &std::path::Path) -> anyhow::Result<()> {
    let mut records = 0usize;
    let segments = tessera_wal::read_all(dir, |segment, mutation| {
        records += 1;
        println!("{} {}", format!("[{segment}]").dimmed(), describe(&mutation));
    })
    .with_context(|| format!("reading {}", dir.display()))?;
    println!(
        "{} {} record(s) in {} segment(s)",
        "✓".green(),
        records.to_string().bold(),
        segments
    );
    Ok(())
}

/// One line per record. Password hashes are not printed.
fn describe(mutation: &Mutation) -> String {
    let event = mutation.to_event();
    let value = match event.kind {
        EventKind::CreateUser => "<hash>".to_string(),
        _ => event.value,
    };
    let mut line = format!("{:<16} {}", event.kind.to_string(), event.name);
    if !value.is_empty() {
        line.push_str(&format!(" = {value}"));
    }
    if !event.metadata.is_empty() {
        line.push_str(&format!(" ({})", event.metadata));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{Level, User, Value};

    #[test]
    fn describes_records() {
        let set = Mutation::Set {
            key: "k".into(),
            value: Value::new("v").with_level(Level::Secret),
        };
        assert_eq!(describe(&set), "Set              k = v (0;2)");
        assert_eq!(
            describe(&Mutation::Delete { key: "k".into() }),
            "Delete           k"
        );
    }

    #[test]
    fn hides_password_hashes() {
        let user = User::new("root", "hunter2", Level::Secret);
        let line = describe(&Mutation::CreateUser(user.clone()));
        assert!(line.contains("<hash>"));
        assert!(!line.contains(&user.password_hash));
    }

    #[test]
    fn default_config_is_printable() {
        let raw = NodeConfig::default().to_toml().unwrap();
        assert!(raw.contains("[wal]"));
        assert!(NodeConfig::from_toml(&raw).is_ok());
    }
}
