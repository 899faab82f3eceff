//! Git transport used by the repository store
//!
//! The store only needs two network operations, so they sit behind a small
//! blocking trait. Tests wrap the real transport to count calls or inject
//! delays.

use git2::build::RepoBuilder;
use git2::{Direction, FetchOptions, RemoteCallbacks, Repository, ResetType};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Remote-tracking refs tried, in order, when resetting to the remote head
const REMOTE_HEAD_REFS: [&str; 3] = [
    "refs/remotes/origin/HEAD",
    "refs/remotes/origin/main",
    "refs/remotes/origin/master",
];

/// Network side of working-copy maintenance.
///
/// Both calls block. `cancel` is polled during transfer; once set the
/// operation aborts with an error.
pub trait GitTransport: Send + Sync {
    /// Single-branch clone of the remote default branch into `dest`
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error>;

    /// Fetch the default remote and hard-reset the working tree to its head
    fn fetch_and_reset(
        &self,
        path: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error>;
}

/// libgit2-backed transport
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Transport;

impl GitTransport for Git2Transport {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error> {
        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options(depth, cancel));

        // Restrict the refspec to the default branch when the remote tells us
        // which one it is; otherwise fall back to a regular clone.
        match remote_default_branch(url) {
            Ok(branch) => {
                let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
                builder.branch(&branch);
                builder.remote_create(move |repo, name, url| {
                    repo.remote_with_fetch(name, url, &refspec)
                });
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "default branch lookup failed, cloning all branches");
            }
        }

        builder.clone(url, dest)?;
        Ok(())
    }

    fn fetch_and_reset(
        &self,
        path: &Path,
        depth: Option<u32>,
        cancel: &AtomicBool,
    ) -> Result<(), git2::Error> {
        let repo = Repository::open(path)?;
        let mut remote = repo.find_remote("origin")?;
        let mut options = fetch_options(depth, cancel);
        let configured: &[&str] = &[];
        remote.fetch(configured, Some(&mut options), None)?;

        // Single-branch clones of a branch other than main/master only have
        // the tracking ref of the checked-out branch.
        let current = repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(|b| format!("refs/remotes/origin/{b}")));
        let target = REMOTE_HEAD_REFS
            .iter()
            .copied()
            .chain(current.as_deref())
            .find_map(|name| repo.revparse_single(name).ok()?.peel_to_commit().ok())
            .ok_or_else(|| git2::Error::from_str("no remote head (HEAD, main, master) after fetch"))?;

        repo.reset(target.as_object(), ResetType::Hard, None)?;
        Ok(())
    }
}

fn fetch_options(depth: Option<u32>, cancel: &AtomicBool) -> FetchOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(move |_| !cancel.load(Ordering::Relaxed));

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    if let Some(depth) = depth.filter(|d| *d > 0) {
        options.depth(depth as i32);
    }
    options
}

/// Ask the remote which branch its HEAD points at
fn remote_default_branch(url: &str) -> Result<String, git2::Error> {
    let mut remote = git2::Remote::create_detached(url)?;
    let connection = remote.connect_auth(Direction::Fetch, None, None)?;
    let head = connection.default_branch()?;
    let head = head
        .as_str()
        .ok_or_else(|| git2::Error::from_str("default branch is not valid UTF-8"))?;
    Ok(head.strip_prefix("refs/heads/").unwrap_or(head).to_string())
}
