//! Rule classification command

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use netpol_derivative::{classify_policy, derivative_name, needs_derivation, RuleClass};
use netpol_types::StandardParser;
use tracing::debug;

use super::{load_policy, scope_of};

#[derive(Args)]
pub struct ClassifyArgs {
    /// Path to the policy file (JSON)
    #[arg(short, long)]
    pub policy: PathBuf,

    /// Parse the policy as cluster-scoped
    #[arg(long)]
    pub cluster_scoped: bool,
}

/// Execute the classify command
pub fn execute(args: ClassifyArgs) -> anyhow::Result<()> {
    let policy = load_policy(&args.policy)?;
    let scope = scope_of(&policy, args.cluster_scoped);
    debug!(policy = %policy.reference(), scope = ?scope, "Classifying policy");

    let rules = classify_policy(&StandardParser, &policy.rewrap(scope))
        .with_context(|| format!("cannot parse {}", args.policy.display()))?;

    for rule in &rules {
        let class = match rule.class {
            RuleClass::Plain => "plain",
            RuleClass::RequiresDerivation => "requires-derivation",
        };
        println!("{}\t{}", rule.index, class);
    }
    if needs_derivation(&rules) {
        println!("derivative: {}", derivative_name(policy.name(), policy.uid()));
    }
    Ok(())
}
