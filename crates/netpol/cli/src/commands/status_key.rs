//! Side-channel key command

use clap::Args;
use netpol_status::KeyLayout;
use netpol_types::NodeName;

use crate::config::AgentConfig;

#[derive(Args)]
pub struct StatusKeyArgs {
    /// Policy name
    #[arg(long)]
    pub name: String,

    /// Policy namespace; omit for cluster-scoped policies
    #[arg(long)]
    pub namespace: Option<String>,

    /// Node name (defaults to the configured node)
    #[arg(long)]
    pub node: Option<String>,
}

/// Execute the status-key command
pub fn execute(args: StatusKeyArgs, config: &AgentConfig) -> anyhow::Result<()> {
    let layout = KeyLayout::from_config(&config.status.side_channel);
    let node = NodeName::new(args.node.unwrap_or_else(|| config.status.node_name.clone()));

    println!(
        "{}",
        layout.key(args.namespace.as_deref().unwrap_or(""), &args.name, &node)
    );
    Ok(())
}
