use anyhow::Result;
use clap::Args;
use git_publish::{BranchTarget, HostingApi, PublishError, Publisher, RepoRef};

use super::FileSource;

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Target repository as <owner>/<name>
    pub repo: RepoRef,

    #[arg(short, long, default_value = "main")]
    pub branch: String,

    #[arg(short, long)]
    pub message: String,

    /// Rebuild on the new tip this many times if another writer wins the race
    #[arg(long, default_value_t = 0)]
    pub conflict_retries: u32,

    #[command(flatten)]
    pub source: FileSource,
}

/// Handle the publish command
pub async fn handle<H: HostingApi + 'static>(publisher: &Publisher<H>, args: PublishArgs) -> Result<()> {
    let batch = args.source.load()?;
    let target = BranchTarget::new(args.repo, args.branch);

    let mut attempt = 0;
    loop {
        match publisher.publish(&target, batch.clone(), &args.message).await {
            Ok(outcome) => {
                println!("{}", outcome.commit);
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < args.conflict_retries => {
                attempt += 1;
                tracing::warn!(
                    "{}; publishing again on the new tip ({}/{})",
                    e,
                    attempt,
                    args.conflict_retries
                );
            }
            Err(e) => return Err(explain(&target, e)),
        }
    }
}

/// Attach the command that finishes an interrupted branch update
pub fn explain(target: &BranchTarget, err: PublishError) -> anyhow::Error {
    let hint = match &err {
        PublishError::PointerUpdate { base, commit, .. } => Some(format!(
            "the commit is built; finish with: git-publish resume {} --branch {} --base {} --commit {}",
            target.repo, target.branch, base, commit
        )),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}
