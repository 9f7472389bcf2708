use anyhow::Result;
use clap::Args;
use git_publish::{BranchTarget, CommitId, HostingApi, Publisher, RepoRef};

#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Repository as <owner>/<name>
    pub repo: RepoRef,

    #[arg(short, long, default_value = "main")]
    pub branch: String,

    /// Branch tip the commit was built on
    #[arg(long)]
    pub base: String,

    /// The already-built commit to move the branch to
    #[arg(long)]
    pub commit: String,
}

/// Handle the resume command: finish an interrupted branch update
pub async fn handle<H: HostingApi + 'static>(publisher: &Publisher<H>, args: ResumeArgs) -> Result<()> {
    let target = BranchTarget::new(args.repo, args.branch);
    let base = CommitId::new(args.base);
    let commit = CommitId::new(args.commit);

    publisher.resume(&target, &base, &commit).await?;
    println!("{}", commit);

    Ok(())
}
