//! Applies a [`Plan`] to the filesystem.
//!
//! The engine renders the plan, starts warming the stores it touches, asks
//! for confirmation, then creates and removes worktrees. Destructive plans
//! are never applied without an explicit yes. Once every change has landed
//! the manifest is rebuilt from disk.

use std::{collections::BTreeSet, fs, mem, path::Path};

use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    config::Config,
    error::{CanopyError, Result, Warning},
    git::{Checkout, Vcs},
    inventory::{Repo, Workspace},
    metadata::{WorkspaceMetadata, WorkspaceMetadataStore},
    output::{Output, OutputError},
    paths,
    plan::{self, Plan},
    planner::{self, ChangeCounts, RepoChange, RepoSide, WorkspaceChange},
    prefetch::Prefetcher,
    repospec::RepoKey,
    repostore::{RepoStores, Store},
    risk::{self, RiskKind},
    snapshot,
};

/// Caller choices for one apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Never prompt. Destructive plans are refused instead.
    pub no_prompt: bool,
}

/// What a completed apply did.
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    /// Workspace changes applied, by kind.
    pub counts: ChangeCounts,
    /// Whether every store was warmed before applying.
    pub prefetched: bool,
    /// Non-fatal problems met along the way.
    pub warnings: Vec<Warning>,
}

/// Terminal state of an apply.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// The plan was empty; nothing was touched.
    NoChanges,
    /// The user answered no.
    Declined,
    /// The user dismissed the prompt.
    Canceled,
    /// Every change was applied and the manifest rebuilt.
    Applied(ApplySummary),
}

/// Safety overrides for removing worktrees.
#[derive(Debug, Clone, Copy)]
struct Safety {
    /// Remove worktrees whose risk is not `Clean`.
    allow_dirty: bool,
    /// Remove worktrees whose status cannot be read.
    allow_status_error: bool,
}

/// Executes plans against a root.
pub struct Applier<'a> {
    /// Invocation settings.
    config: &'a Config,
    /// VCS used for the apply phase.
    vcs: &'a dyn Vcs,
    /// Invocation token, checked between changes.
    cancel: CancelToken,
    /// Where steps are reported.
    output: &'a dyn Output,
}

impl<'a> Applier<'a> {
    /// Create an engine.
    pub fn new(
        config: &'a Config,
        vcs: &'a dyn Vcs,
        cancel: CancelToken,
        output: &'a dyn Output,
    ) -> Self {
        Self {
            config,
            vcs,
            cancel,
            output,
        }
    }

    /// Confirm and apply `plan`.
    ///
    /// `prefetcher` is started on the plan's repo keys before the prompt so
    /// network work overlaps with the user reading the plan. Its failures are
    /// reported as warnings; errors from the apply phase are returned as is.
    pub fn apply(
        &self,
        plan: &Plan,
        options: ApplyOptions,
        mut prefetcher: Prefetcher,
    ) -> Result<ApplyOutcome> {
        if plan.is_empty() {
            self.output.message("no changes")?;
            return Ok(ApplyOutcome::NoChanges);
        }
        plan.render(self.output)?;
        let destructive = plan.is_destructive();
        if destructive {
            self.report_removal_risk(plan)?;
            if options.no_prompt {
                return Err(CanopyError::DestructiveNeedsConfirmation);
            }
        }

        let keys = plan.prefetch_keys();
        let started = prefetcher.start_all(&keys)?;
        debug!(started, "prefetch running");

        if !options.no_prompt {
            let answer = match self.output.confirm("Apply these changes?") {
                Ok(true) => None,
                Ok(false) => Some(ApplyOutcome::Declined),
                Err(OutputError::Cancelled) => Some(ApplyOutcome::Canceled),
                Err(e) => {
                    prefetcher.abandon();
                    return Err(e.into());
                }
            };
            if let Some(outcome) = answer {
                prefetcher.abandon();
                return Ok(outcome);
            }
        }

        let mut summary = ApplySummary {
            counts: planner::count_changes(&plan.changes),
            ..ApplySummary::default()
        };
        summary.prefetched = match prefetcher.wait_all() {
            Ok(()) => true,
            Err(CanopyError::Prefetch(msg)) => {
                warn!("prefetch failed (continuing): {msg}");
                self.output.warn(&format!("prefetch failed (continuing): {msg}"))?;
                summary.warnings.push(Warning::new("prefetch", msg));
                false
            }
            Err(e) => return Err(e),
        };

        let safety = Safety {
            allow_dirty: destructive,
            allow_status_error: destructive,
        };
        let mut run = Run {
            stores: RepoStores::new(self.config, self.vcs),
            fetch: !summary.prefetched,
            touched: BTreeSet::new(),
            warnings: Vec::new(),
        };
        // Removals run first so a branch freed by one workspace can be checked
        // out by another.
        for change in &plan.changes {
            self.cancel.check()?;
            match change {
                WorkspaceChange::Add { .. } => {}
                WorkspaceChange::Remove { id } => {
                    let repos = plan.actual.get(id).map(|ws| ws.repos.as_slice());
                    self.remove_workspace(&mut run, id, repos.unwrap_or_default(), safety)?;
                }
                WorkspaceChange::Update { id, repos } => {
                    self.retire_repos(&mut run, id, repos, safety)?;
                }
            }
        }
        for change in &plan.changes {
            self.cancel.check()?;
            match change {
                WorkspaceChange::Add { id } => {
                    let ws = desired_workspace(plan, id)?;
                    self.add_workspace(&mut run, ws)?;
                }
                WorkspaceChange::Remove { .. } => {}
                WorkspaceChange::Update { id, repos } => {
                    let ws = desired_workspace(plan, id)?;
                    self.update_workspace(&mut run, ws, repos)?;
                }
            }
        }
        self.prune_stores(&mut run);
        summary.warnings.append(&mut run.warnings);

        let imported = plan::import(&self.config.root, self.vcs)?;
        summary.warnings.extend(imported.warnings);
        let ChangeCounts { add, update, remove } = summary.counts;
        info!(add, update, remove, "plan applied");
        self.output
            .success(&format!("applied: add={add} update={update} remove={remove}"))?;
        Ok(ApplyOutcome::Applied(summary))
    }

    /// Show the risk of every workspace and worktree the plan discards.
    fn report_removal_risk(&self, plan: &Plan) -> Result<()> {
        for change in &plan.changes {
            match change {
                WorkspaceChange::Add { .. } => {}
                WorkspaceChange::Remove { id } => {
                    let kind = match snapshot::workspace_state(&self.config.root, self.vcs, id) {
                        Ok(state) => state.kind,
                        Err(e) => {
                            warn!("cannot classify workspace {id}: {e}");
                            RiskKind::Unknown
                        }
                    };
                    if risk::requires_remove_confirmation(kind) {
                        self.output
                            .warn(&format!("{id}: {kind} work will be discarded"))?;
                    }
                }
                WorkspaceChange::Update { id, repos } => {
                    let dir = paths::workspace_dir(&self.config.root, id);
                    for alias in discarded_aliases(repos) {
                        let kind = self.worktree_risk(&dir.join(alias));
                        if risk::requires_remove_confirmation(kind) {
                            self.output
                                .warn(&format!("{id}/{alias}: {kind} work will be discarded"))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Risk of one worktree, `Unknown` when its status cannot be read.
    fn worktree_risk(&self, worktree: &Path) -> RiskKind {
        match self.vcs.status(worktree) {
            Ok(status) => risk::classify_repo_status(&status),
            Err(e) => {
                warn!("status of {} failed: {e}", worktree.display());
                RiskKind::Unknown
            }
        }
    }

    /// Create a workspace directory, its metadata and every worktree.
    fn add_workspace(&self, run: &mut Run<'_>, ws: &Workspace) -> Result<()> {
        let section = self.output.section(&format!("adding workspace {}", ws.id));
        let dir = paths::workspace_dir(&self.config.root, &ws.id);
        fs::create_dir_all(&dir)?;
        WorkspaceMetadataStore::new(&dir).write(&WorkspaceMetadata::from_workspace(ws))?;
        for repo in &ws.repos {
            self.add_repo(run, section.as_ref(), &dir, repo)?;
        }
        Ok(())
    }

    /// Check every worktree can go, then remove them and the directory.
    fn remove_workspace(
        &self,
        run: &mut Run<'_>,
        id: &str,
        repos: &[Repo],
        safety: Safety,
    ) -> Result<()> {
        let section = self.output.section(&format!("removing workspace {id}"));
        let dir = paths::workspace_dir(&self.config.root, id);
        for repo in repos {
            self.check_removable(section.as_ref(), id, &dir.join(&repo.alias), safety)?;
        }
        for repo in repos {
            self.remove_repo(run, section.as_ref(), &dir, &repo.alias, &repo.repo_key)?;
        }
        WorkspaceMetadataStore::new(&dir).remove()?;
        if paths::dir_exists(&dir)? {
            fs::remove_dir_all(&dir)?;
        }
        section.success(&format!("removed {id}"))?;
        Ok(())
    }

    /// Remove the worktrees an update replaces or drops.
    fn retire_repos(
        &self,
        run: &mut Run<'_>,
        id: &str,
        changes: &[RepoChange],
        safety: Safety,
    ) -> Result<()> {
        let retiring: Vec<_> = changes
            .iter()
            .filter_map(|change| match change {
                RepoChange::Add { .. } => None,
                RepoChange::Remove { alias, before } | RepoChange::Update { alias, before, .. } => {
                    Some((alias, before))
                }
            })
            .collect();
        if retiring.is_empty() {
            return Ok(());
        }
        let section = self.output.section(&format!("updating workspace {id}"));
        for (alias, before) in retiring {
            self.cancel.check()?;
            self.replace_repo(run, section.as_ref(), id, alias, before, safety)?;
        }
        Ok(())
    }

    /// Add the worktrees an update introduces or replaces.
    fn update_workspace(
        &self,
        run: &mut Run<'_>,
        ws: &Workspace,
        changes: &[RepoChange],
    ) -> Result<()> {
        let adding: Vec<&str> = changes
            .iter()
            .filter_map(|change| match change {
                RepoChange::Remove { .. } => None,
                RepoChange::Add { alias, .. } | RepoChange::Update { alias, .. } => {
                    Some(alias.as_str())
                }
            })
            .collect();
        if adding.is_empty() {
            return Ok(());
        }
        let section = self.output.section(&format!("updating workspace {}", ws.id));
        let dir = paths::workspace_dir(&self.config.root, &ws.id);
        let metadata = WorkspaceMetadataStore::new(&dir);
        for alias in adding {
            self.cancel.check()?;
            let repo = desired_repo(ws, alias)?;
            self.add_repo(run, section.as_ref(), &dir, repo)?;
            metadata.set_base_ref(alias, &repo.base_ref)?;
        }
        Ok(())
    }

    /// Safety-check and remove one worktree of an existing workspace.
    fn replace_repo(
        &self,
        run: &mut Run<'_>,
        out: &dyn Output,
        id: &str,
        alias: &str,
        before: &RepoSide,
        safety: Safety,
    ) -> Result<()> {
        let dir = paths::workspace_dir(&self.config.root, id);
        self.check_removable(out, id, &dir.join(alias), safety)?;
        self.remove_repo(run, out, &dir, alias, &before.repo_key)
    }

    /// Refuse to discard a worktree the caller has not cleared.
    fn check_removable(
        &self,
        out: &dyn Output,
        id: &str,
        worktree: &Path,
        safety: Safety,
    ) -> Result<()> {
        let alias = worktree
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.vcs.status(worktree) {
            Ok(status) => {
                let kind = risk::classify_repo_status(&status);
                if risk::requires_remove_confirmation(kind) {
                    if !safety.allow_dirty {
                        return Err(CanopyError::Workspace {
                            id: id.to_string(),
                            message: format!("{alias} is {kind}; refusing to remove it"),
                        });
                    }
                    out.warn(&format!("discarding {alias} ({kind})"))?;
                }
                Ok(())
            }
            Err(e) if safety.allow_status_error => {
                warn!("status of {} failed: {e}", worktree.display());
                out.warn(&format!("discarding {alias} (status unavailable)"))?;
                Ok(())
            }
            Err(e) => Err(CanopyError::Workspace {
                id: id.to_string(),
                message: format!("cannot read status of {alias}: {e}"),
            }),
        }
    }

    /// Ensure the repo's store and add its worktree under `dir`.
    fn add_repo(&self, run: &mut Run<'_>, out: &dyn Output, dir: &Path, repo: &Repo) -> Result<()> {
        let key = RepoKey::parse(&repo.repo_key)?;
        let spinner = out.spinner(&format!("{} ({})", repo.alias, key));
        let result = run.stores.ensure_key(&key, run.fetch).and_then(|store| {
            let checkout = self.checkout_for(&store, repo)?;
            debug!(alias = %repo.alias, ?checkout, "adding worktree");
            self.vcs
                .add_worktree(&store.path, &dir.join(&repo.alias), &checkout)
        });
        spinner.finish_and_clear();
        result?;
        out.success(&format!("{} @ {}", repo.alias, repo.branch))?;
        Ok(())
    }

    /// Pick how the worktree gets its branch: an existing local branch, a
    /// remote branch to track, or a new branch from the base ref.
    fn checkout_for(&self, store: &Store, repo: &Repo) -> Result<Checkout> {
        let branch = repo.branch.clone();
        if self
            .vcs
            .show_ref(&store.path, &format!("refs/heads/{branch}"))?
            .is_some()
        {
            return Ok(Checkout::Existing { branch });
        }
        if self
            .vcs
            .show_ref(&store.path, &format!("refs/remotes/origin/{branch}"))?
            .is_some()
        {
            return Ok(Checkout::Track {
                upstream: format!("origin/{branch}"),
                branch,
            });
        }
        let start_point = if !repo.base_ref.is_empty() {
            repo.base_ref.clone()
        } else if !store.default_branch.is_empty() {
            format!("origin/{}", store.default_branch)
        } else {
            return Err(CanopyError::Workspace {
                id: repo.alias.clone(),
                message: format!(
                    "cannot create branch {branch}: {} has no default branch",
                    store.repo_key
                ),
            });
        };
        Ok(Checkout::Create {
            branch,
            start_point,
        })
    }

    /// Remove one worktree and remember its store for pruning.
    fn remove_repo(
        &self,
        run: &mut Run<'_>,
        out: &dyn Output,
        dir: &Path,
        alias: &str,
        repo_key: &str,
    ) -> Result<()> {
        let worktree = dir.join(alias);
        let key = RepoKey::parse(repo_key)?;
        let store = run.stores.path(&key);
        if paths::dir_exists(&store)? {
            self.vcs.remove_worktree(&store, &worktree)?;
            run.touched.insert(key);
        }
        if paths::dir_exists(&worktree)? {
            fs::remove_dir_all(&worktree)?;
        }
        out.message(&format!("removed {alias}"))?;
        Ok(())
    }

    /// Prune stale local branches from every store a removal touched.
    fn prune_stores(&self, run: &mut Run<'_>) {
        for key in mem::take(&mut run.touched) {
            if let Err(e) = run.stores.open(&key, false) {
                warn!("pruning {key} failed: {e}");
                run.warnings
                    .push(Warning::new(format!("repo {key}"), format!("prune: {e}")));
            }
        }
    }
}

/// Mutable state of one apply phase.
struct Run<'a> {
    /// Store reconciler.
    stores: RepoStores<'a>,
    /// Whether ensuring a store should fetch; false once prefetch succeeded.
    fetch: bool,
    /// Stores that lost a worktree.
    touched: BTreeSet<RepoKey>,
    /// Warnings collected while applying.
    warnings: Vec<Warning>,
}

/// Aliases whose worktree a workspace update discards.
fn discarded_aliases(changes: &[RepoChange]) -> impl Iterator<Item = &str> {
    changes.iter().filter_map(|change| match change {
        RepoChange::Add { .. } => None,
        RepoChange::Remove { alias, .. } | RepoChange::Update { alias, .. } => Some(alias.as_str()),
    })
}

/// The desired workspace a change refers to.
fn desired_workspace<'p>(plan: &'p Plan, id: &str) -> Result<&'p Workspace> {
    plan.desired.get(id).ok_or_else(|| CanopyError::Workspace {
        id: id.to_string(),
        message: "not in the desired inventory".to_string(),
    })
}

/// The desired repo a change refers to.
fn desired_repo<'w>(ws: &'w Workspace, alias: &str) -> Result<&'w Repo> {
    ws.repo(alias).ok_or_else(|| CanopyError::Workspace {
        id: ws.id.clone(),
        message: format!("repo {alias} is not in the desired inventory"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        manifest::{Manifest, ManifestRepo, ManifestWorkspace},
        output::Quiet,
        risk::RepoStatus,
        testing::{FakeVcs, Recorder},
    };

    const APP_URL: &str = "https://github.com/acme/app.git";
    const LIB_URL: &str = "https://github.com/acme/lib.git";

    /// A root, a fake with two remotes and the config pointing at the root.
    struct Fixture {
        tmp: TempDir,
        vcs: Arc<FakeVcs>,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let vcs = FakeVcs::new();
            vcs.add_remote(APP_URL, "main", &["main", "feature"]);
            vcs.add_remote(LIB_URL, "trunk", &["trunk"]);
            let config = Config::with_root(tmp.path());
            Self {
                tmp,
                vcs: Arc::new(vcs),
                config,
            }
        }

        fn root(&self) -> &Path {
            self.tmp.path()
        }

        /// Write a manifest of `(id, [(alias, key, branch)])` entries.
        fn write_manifest(&self, workspaces: &[(&str, &[(&str, &str, &str)])]) {
            let mut manifest = Manifest::new();
            for (id, repos) in workspaces {
                manifest.workspaces.insert(
                    id.to_string(),
                    ManifestWorkspace {
                        mode: "manual".to_string(),
                        repos: repos
                            .iter()
                            .map(|(alias, key, branch)| ManifestRepo {
                                alias: alias.to_string(),
                                repo_key: key.to_string(),
                                branch: branch.to_string(),
                                base_ref: String::new(),
                            })
                            .collect(),
                        ..ManifestWorkspace::default()
                    },
                );
            }
            manifest.save(self.root()).unwrap();
        }

        fn prefetcher(&self) -> Prefetcher {
            Prefetcher::new(
                self.vcs.clone(),
                self.config.clone(),
                CancelToken::new(),
            )
        }

        fn apply(&self, out: &Recorder, options: ApplyOptions) -> Result<ApplyOutcome> {
            let plan = plan::plan(self.root(), self.vcs.as_ref())?;
            Applier::new(&self.config, self.vcs.as_ref(), CancelToken::new(), out)
                .apply(&plan, options, self.prefetcher())
        }

        /// Apply a manifest without prompting; panics unless it was applied.
        fn apply_all(&self) -> ApplySummary {
            match self.apply(&Recorder::answering(Some(true)), ApplyOptions::default()) {
                Ok(ApplyOutcome::Applied(summary)) => summary,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    const APP: (&str, &str, &str) = ("app", "github.com/acme/app.git", "main");
    const LIB: (&str, &str, &str) = ("lib", "github.com/acme/lib.git", "trunk");

    #[test]
    fn empty_plan_touches_nothing() {
        let fx = Fixture::new();
        fx.write_manifest(&[]);
        let out = Recorder::answering(Some(true));
        let outcome = fx.apply(&out, ApplyOptions::default()).unwrap();
        assert!(matches!(outcome, ApplyOutcome::NoChanges));
        assert!(fx.vcs.calls().is_empty());
        assert!(!out.saw("confirm"));
    }

    #[test]
    fn adds_workspaces_and_rebuilds_manifest() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP, LIB])]);
        let summary = fx.apply_all();
        assert!(summary.prefetched);
        assert_eq!(summary.counts.add, 1);

        let ws = fx.root().join("ws/W1");
        assert!(ws.join("app/.git").exists());
        assert!(ws.join("lib/.git").exists());
        let metadata = WorkspaceMetadataStore::new(&ws).read().unwrap().unwrap();
        assert_eq!(metadata.mode, "manual");

        // Prefetch did the network work; the apply phase did not fetch again.
        assert_eq!(fx.vcs.count("clone"), 2);
        assert_eq!(fx.vcs.count("fetch --prune"), 2);

        let manifest = Manifest::load(fx.root()).unwrap();
        assert_eq!(manifest.workspaces["W1"].repos.len(), 2);
        assert!(plan::plan(fx.root(), fx.vcs.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn new_branches_track_or_start_from_default() {
        let fx = Fixture::new();
        fx.vcs.push_remote_branch(APP_URL, "topic");
        fx.write_manifest(&[
            ("W1", &[("app", "github.com/acme/app.git", "topic")]),
            ("W2", &[("app", "github.com/acme/app.git", "fresh")]),
        ]);
        fx.apply_all();
        let calls = fx.vcs.calls();
        assert!(calls.contains(&"worktree add --track -b topic origin/topic".to_string()));
        assert!(calls.contains(&"worktree add -b fresh origin/main".to_string()));
    }

    #[test]
    fn declined_and_canceled_are_not_errors() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);

        let declined = fx.apply(&Recorder::answering(Some(false)), ApplyOptions::default());
        assert!(matches!(declined, Ok(ApplyOutcome::Declined)));
        let canceled = fx.apply(&Recorder::answering(None), ApplyOptions::default());
        assert!(matches!(canceled, Ok(ApplyOutcome::Canceled)));

        assert!(!fx.root().join("ws/W1").exists());
        assert_eq!(fx.vcs.count("worktree add"), 0);
    }

    #[test]
    fn destructive_plan_needs_a_prompt() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        fx.apply_all();
        fx.write_manifest(&[]);

        let out = Recorder::answering(Some(true));
        let err = fx
            .apply(&out, ApplyOptions { no_prompt: true })
            .unwrap_err();
        assert!(matches!(err, CanopyError::DestructiveNeedsConfirmation));
        assert_eq!(err.to_string(), "destructive changes require confirmation");
        assert!(fx.root().join("ws/W1/app").exists());
        assert_eq!(fx.vcs.count("worktree remove"), 0);
    }

    #[test]
    fn additive_plan_applies_without_prompt() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        let out = Recorder::answering(None);
        let outcome = fx.apply(&out, ApplyOptions { no_prompt: true }).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert!(!out.saw("confirm"));
        assert!(out.saw("applied: add=1 update=0 remove=0"));
    }

    #[test]
    fn confirmed_removal_discards_dirty_work() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP]), ("W2", &[LIB])]);
        fx.apply_all();
        let app = fx.root().join("ws/W1/app");
        fx.vcs.set_status(
            &app,
            RepoStatus {
                branch: "main".to_string(),
                upstream: "origin/main".to_string(),
                unstaged: 1,
                ..RepoStatus::default()
            },
        );
        fx.write_manifest(&[("W2", &[LIB])]);

        let out = Recorder::answering(Some(true));
        let outcome = fx.apply(&out, ApplyOptions::default()).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert!(out.saw("W1: dirty work will be discarded"));
        assert!(!fx.root().join("ws/W1").exists());
        assert!(fx.root().join("ws/W2/lib").exists());
        assert!(!Manifest::load(fx.root()).unwrap().workspaces.contains_key("W1"));
    }

    #[test]
    fn update_switches_branch() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        fx.apply_all();
        fx.write_manifest(&[("W1", &[("app", "github.com/acme/app.git", "feature")])]);

        let summary = fx.apply_all();
        assert_eq!(summary.counts.update, 1);
        let head = fx
            .vcs
            .symbolic_ref(&fx.root().join("ws/W1/app"), "HEAD")
            .unwrap();
        assert_eq!(head.as_deref(), Some("refs/heads/feature"));
        assert_eq!(fx.vcs.count("worktree remove"), 1);
    }

    #[test]
    fn renamed_workspace_keeps_its_branch() {
        let fx = Fixture::new();
        let feature = ("app", "github.com/acme/app.git", "feature");
        fx.write_manifest(&[("W2", &[feature])]);
        fx.apply_all();
        fx.write_manifest(&[("W1", &[feature])]);

        let summary = fx.apply_all();
        assert_eq!((summary.counts.add, summary.counts.remove), (1, 1));
        assert!(!fx.root().join("ws/W2").exists());
        let head = fx
            .vcs
            .symbolic_ref(&fx.root().join("ws/W1/app"), "HEAD")
            .unwrap();
        assert_eq!(head.as_deref(), Some("refs/heads/feature"));
        assert!(plan::plan(fx.root(), fx.vcs.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn workspaces_can_swap_branches() {
        let fx = Fixture::new();
        let main = ("app", "github.com/acme/app.git", "main");
        let feature = ("app", "github.com/acme/app.git", "feature");
        fx.write_manifest(&[("W1", &[main]), ("W2", &[feature])]);
        fx.apply_all();
        fx.write_manifest(&[("W1", &[feature]), ("W2", &[main])]);

        let summary = fx.apply_all();
        assert_eq!(summary.counts.update, 2);
        let head = |id: &str| {
            fx.vcs
                .symbolic_ref(&fx.root().join(format!("ws/{id}/app")), "HEAD")
                .unwrap()
        };
        assert_eq!(head("W1").as_deref(), Some("refs/heads/feature"));
        assert_eq!(head("W2").as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn discarded_repo_risk_is_shown_before_the_prompt() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        fx.apply_all();
        fx.vcs.set_status(
            &fx.root().join("ws/W1/app"),
            RepoStatus {
                branch: "main".to_string(),
                upstream: "origin/main".to_string(),
                unstaged: 3,
                ..RepoStatus::default()
            },
        );
        fx.write_manifest(&[("W1", &[("app", "github.com/acme/app.git", "feature")])]);

        let out = Recorder::answering(Some(false));
        let outcome = fx.apply(&out, ApplyOptions::default()).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Declined));
        let lines = out.lines();
        let warned = lines
            .iter()
            .position(|line| line == "warn: W1/app: dirty work will be discarded")
            .expect("risk warning");
        let confirm = lines
            .iter()
            .position(|line| line.starts_with("confirm:"))
            .expect("prompt");
        assert!(warned < confirm, "{lines:?}");
        assert!(fx.root().join("ws/W1/app").exists());
    }

    #[test]
    fn prefetch_failure_is_a_warning() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        fx.apply_all();
        fx.vcs.set_offline(LIB_URL);
        fx.write_manifest(&[("W1", &[APP]), ("W2", &[LIB])]);

        let out = Recorder::answering(Some(true));
        let err = fx.apply(&out, ApplyOptions::default()).unwrap_err();
        assert!(out.saw("prefetch failed (continuing)"));
        // The apply phase still tries the clone, which fails for real.
        assert!(matches!(err, CanopyError::Git(_)));
        assert!(Manifest::load(fx.root()).unwrap().workspaces.contains_key("W2"));
    }

    #[test]
    fn unreadable_status_blocks_non_destructive_removal() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        fx.apply_all();
        let app = fx.root().join("ws/W1/app");
        fx.vcs.fail_status(&app);

        let applier = Applier::new(
            &fx.config,
            fx.vcs.as_ref(),
            CancelToken::new(),
            &Quiet,
        );
        let out = Recorder::default();
        let safety = Safety {
            allow_dirty: false,
            allow_status_error: false,
        };
        let err = applier.check_removable(&out, "W1", &app, safety).unwrap_err();
        assert!(err.to_string().contains("cannot read status of app"), "{err}");

        let lenient = Safety {
            allow_dirty: true,
            allow_status_error: true,
        };
        applier.check_removable(&out, "W1", &app, lenient).unwrap();
        assert!(out.saw("status unavailable"));
    }

    #[test]
    fn cancellation_stops_between_changes() {
        let fx = Fixture::new();
        fx.write_manifest(&[("W1", &[APP])]);
        let plan = plan::plan(fx.root(), fx.vcs.as_ref()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = Recorder::answering(Some(true));
        let err = Applier::new(&fx.config, fx.vcs.as_ref(), cancel, &out)
            .apply(&plan, ApplyOptions::default(), fx.prefetcher())
            .unwrap_err();
        assert!(matches!(err, CanopyError::Cancelled));
        assert!(!fx.root().join("ws/W1").exists());
    }
}
