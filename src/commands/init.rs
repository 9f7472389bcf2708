use anyhow::Result;
use clap::Args;
use git_publish::{
    repository::{initialize_and_publish, RepoCreation, RepositoryError, RepositoryOptions},
    BranchTarget, HostingApi, Publisher, RepoRef,
};

use super::{publish::explain, FileSource};

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Repository to create (or reuse) as <owner>/<name>
    pub repo: RepoRef,

    #[arg(short, long, default_value = "main")]
    pub branch: String,

    #[arg(short, long)]
    pub message: String,

    /// Create a public repository (new repositories are private otherwise)
    #[arg(long)]
    pub public: bool,

    #[arg(long)]
    pub description: Option<String>,

    /// Fail instead of reusing a repository that already exists
    #[arg(long)]
    pub no_reuse: bool,

    #[command(flatten)]
    pub source: FileSource,
}

/// Handle the init command: create-or-reuse, then publish
pub async fn handle<H: HostingApi + 'static>(publisher: &Publisher<H>, args: InitArgs) -> Result<()> {
    let batch = args.source.load()?;
    let target = BranchTarget::new(args.repo, args.branch);
    let options = RepositoryOptions {
        private: !args.public,
        description: args.description,
        reuse_existing: !args.no_reuse,
        ..RepositoryOptions::default()
    };

    match initialize_and_publish(publisher, &target, batch, &args.message, &options).await {
        Ok((creation, outcome)) => {
            let verb = match creation {
                RepoCreation::Created => "created",
                RepoCreation::Reused => "reused",
            };
            tracing::info!("Repository {} {}", target.repo, verb);
            println!("{}", outcome.commit);
            Ok(())
        }
        Err(RepositoryError::Publish(e)) => Err(explain(&target, e)),
        Err(e) => Err(e.into()),
    }
}
