use anyhow::{Context, Result};
use clap::Args;
use git_publish::{BranchTarget, HostingApi, RepoRef};

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Repository as <owner>/<name>
    pub repo: RepoRef,

    #[arg(short, long, default_value = "main")]
    pub branch: String,
}

/// Handle the tree command: output one "<mode> <blob>\t<path>" line per file at the branch tip
pub async fn handle<H: HostingApi>(host: &H, args: TreeArgs) -> Result<()> {
    let target = BranchTarget::new(args.repo, args.branch);

    let tip = host
        .branch_tip(&target)
        .await
        .with_context(|| format!("Failed to read {}", target))?;
    let commit = host
        .commit(&target.repo, &tip)
        .await
        .with_context(|| format!("Failed to read commit {}", tip))?;
    let files = host
        .read_tree(&target.repo, &commit.tree)
        .await
        .with_context(|| format!("Failed to read tree {}", commit.tree))?;

    eprintln!("{} at {}", target, tip);
    for (path, entry) in &files {
        println!("{} {}\t{}", entry.mode, entry.blob, path);
    }

    Ok(())
}
