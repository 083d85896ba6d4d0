//! Offline derivation command

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use netpol_backend::CancelSignal;
use netpol_derivative::{DerivativeSynthesizer, GroupResolver, StaticGroup, StaticGroupProvider};
use netpol_types::StandardParser;
use tracing::info;

use super::{load_policy, scope_of};

#[derive(Args)]
pub struct DeriveArgs {
    /// Path to the policy file (JSON)
    #[arg(short, long)]
    pub policy: PathBuf,

    /// Parse the policy as cluster-scoped
    #[arg(long)]
    pub cluster_scoped: bool,

    /// Static group map (JSON): provider name to its groups
    #[arg(short, long)]
    pub groups: Option<PathBuf>,
}

fn load_resolver(path: Option<&PathBuf>) -> anyhow::Result<GroupResolver> {
    let mut resolver = GroupResolver::new();
    let Some(path) = path else {
        return Ok(resolver);
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read groups file {}", path.display()))?;
    let providers: BTreeMap<String, Vec<StaticGroup>> = serde_json::from_str(&contents)
        .with_context(|| format!("invalid groups file {}", path.display()))?;

    for (name, groups) in providers {
        info!(provider = %name, groups = groups.len(), "Loaded static groups");
        let provider = StaticGroupProvider::from_entries(name, groups);
        resolver = resolver.with_provider(Arc::new(provider));
    }
    Ok(resolver)
}

/// Execute the derive command.
///
/// A partial derivative is still printed when synthesis fails.
pub async fn execute(args: DeriveArgs) -> anyhow::Result<()> {
    let policy = load_policy(&args.policy)?;
    let scope = scope_of(&policy, args.cluster_scoped);
    let resolver = load_resolver(args.groups.as_ref())?;

    let synthesizer = DerivativeSynthesizer::new(Arc::new(StandardParser), Arc::new(resolver));
    match synthesizer
        .synthesize(&CancelSignal::never(), &policy, scope)
        .await
    {
        Ok(derivative) => {
            println!("{}", serde_json::to_string_pretty(&derivative)?);
            Ok(())
        }
        Err(err) => {
            if let Some(partial) = &err.partial {
                println!("{}", serde_json::to_string_pretty(partial)?);
            }
            Err(anyhow::Error::new(err).context("derivation incomplete"))
        }
    }
}
