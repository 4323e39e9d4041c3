//! One orbit CUD: a live orbit, the views drawing it, and the reference/diff workflow.
//!
//! When the reference update flag fires, the screen rereads `current_refs.csv`,
//! refreshes the timestamp labels, and rebinds its views either to the live
//! orbit (no reference) or to a [`DiffOrbit`] of live minus the stored
//! snapshot. A reference that fails to load never leaves a half-built diff
//! bound; what happens instead is chosen by [`RefFailurePolicy`].

use std::collections::{BTreeMap, VecDeque};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::ReferenceError;
use crate::orbit::{DiffOrbit, Orbit, OrbitHandle, SharedOrbit};
use crate::pv::{PvSource, PvUpdate};
use crate::refs::{BeamRefStore, CurrentRefs, RefEntry, ReferenceKind};
use crate::view::{OrbitView, OrbitViewOptions};

/// Status lines kept for display.
pub const STATUS_HISTORY: usize = 50;
/// Label text for a reference whose filename carries no valid timestamp.
pub const INVALID_REFERENCE_TEXT: &str = "INVALID REFERENCE";

/// What to bind when a reference cannot be loaded or diffed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefFailurePolicy {
    /// Drop any reference and show the live orbit.
    #[default]
    FallBackToLive,
    /// Keep showing the previously loaded reference diff, if there is one.
    KeepPrevious,
}

/// Result of applying the current reference.
#[derive(Clone, Debug, PartialEq)]
pub enum RefOutcome {
    /// No reference set; views show the live orbit.
    Live,
    /// Views show live minus the reference at this path.
    Diff(PathBuf),
}

#[derive(Clone, Debug)]
pub struct OrbitScreenConfig {
    pub title: String,
    /// Orbit reference kind this screen diffs against.
    pub ref_kind: Option<ReferenceKind>,
    /// Other references whose timestamps are shown.
    pub label_kinds: Vec<ReferenceKind>,
    pub views: Vec<OrbitViewOptions>,
    pub policy: RefFailurePolicy,
}

pub struct OrbitScreen {
    title: String,
    live: SharedOrbit,
    views: Vec<OrbitView>,
    ref_kind: Option<ReferenceKind>,
    label_kinds: Vec<ReferenceKind>,
    labels: BTreeMap<ReferenceKind, String>,
    store: BeamRefStore,
    policy: RefFailurePolicy,
    diff: Option<(PathBuf, OrbitHandle)>,
    flag_rx: Option<Receiver<PvUpdate>>,
    status: VecDeque<String>,
}

impl OrbitScreen {
    /// Build the screen with every view bound to `live`. X and Y views share one
    /// link group so they pan and zoom together.
    pub fn new(live: Orbit, store: BeamRefStore, cfg: OrbitScreenConfig) -> Self {
        let live = Rc::new(RefCell::new(live));
        let link = format!("{}-links", cfg.title);
        let handle = OrbitHandle::Live(live.clone());
        let views = cfg
            .views
            .into_iter()
            .map(|mut opts| {
                opts.x_link.get_or_insert_with(|| link.clone());
                if opts.axis != crate::orbit::Axis::Tmit {
                    opts.y_link.get_or_insert_with(|| link.clone());
                }
                OrbitView::with_orbit(opts, handle.clone())
            })
            .collect();
        let mut label_kinds = cfg.label_kinds;
        if let Some(k) = cfg.ref_kind {
            if !label_kinds.contains(&k) {
                label_kinds.push(k);
            }
        }
        Self {
            title: cfg.title,
            live,
            views,
            ref_kind: cfg.ref_kind,
            label_kinds,
            labels: BTreeMap::new(),
            store,
            policy: cfg.policy,
            diff: None,
            flag_rx: None,
            status: VecDeque::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn live(&self) -> &SharedOrbit {
        &self.live
    }

    pub fn views(&self) -> &[OrbitView] {
        &self.views
    }

    pub fn views_mut(&mut self) -> &mut [OrbitView] {
        &mut self.views
    }

    pub fn store(&self) -> &BeamRefStore {
        &self.store
    }

    pub fn policy(&self) -> RefFailurePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: RefFailurePolicy) {
        self.policy = policy;
    }

    pub fn is_showing_diff(&self) -> bool {
        self.diff.is_some()
    }

    /// Path of the reference currently diffed against.
    pub fn reference_path(&self) -> Option<&Path> {
        self.diff.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn ref_kind(&self) -> Option<ReferenceKind> {
        self.ref_kind
    }

    pub fn ref_label(&self, kind: ReferenceKind) -> Option<&str> {
        self.labels.get(&kind).map(String::as_str)
    }

    pub fn label_kinds(&self) -> &[ReferenceKind] {
        &self.label_kinds
    }

    pub fn status(&self) -> impl Iterator<Item = &str> {
        self.status.iter().map(String::as_str)
    }

    pub fn last_status(&self) -> Option<&str> {
        self.status.back().map(String::as_str)
    }

    fn push_status(&mut self, msg: String) {
        let stamped = format!("{} {}", chrono::Local::now().format("%H:%M:%S"), msg);
        if self.status.len() == STATUS_HISTORY {
            self.status.pop_front();
        }
        self.status.push_back(stamped);
    }

    /// Subscribe the live orbit and the reference update flag.
    pub fn connect(&mut self, source: &dyn PvSource) {
        self.live.borrow_mut().connect(source);
        self.flag_rx = Some(source.subscribe(self.store.update_pv()));
    }

    /// Drain PV updates. A nonzero update flag triggers
    /// [`on_reference_updated`](Self::on_reference_updated). Returns the number of BPM updates applied.
    pub fn poll(&mut self) -> usize {
        let applied = self.live.borrow_mut().poll();
        let mut flagged = false;
        let mut disconnected = false;
        if let Some(rx) = &self.flag_rx {
            loop {
                match rx.try_recv() {
                    Ok(update) => flagged |= update.value.is_set(),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            warn!(screen = %self.title, "reference update flag disconnected");
            self.flag_rx = None;
        }
        if flagged {
            // Errors are already logged and put on the status line.
            let _ = self.on_reference_updated();
        }
        applied
    }

    /// Advance every view's draw timer.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.views.iter_mut().map(|v| usize::from(v.tick(now))).sum()
    }

    /// Reread the current references, refresh labels and rebind the views.
    pub fn on_reference_updated(&mut self) -> Result<RefOutcome, ReferenceError> {
        let refs = match self.store.read_current_refs() {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };
        self.update_labels(&refs);
        let Some(kind) = self.ref_kind else {
            return Ok(RefOutcome::Live);
        };
        match refs.get(kind).clone() {
            RefEntry::NotSet => {
                self.show_live();
                self.push_status(format!("{kind}: no reference set"));
                Ok(RefOutcome::Live)
            }
            RefEntry::Path(path) => self.load_reference(&path),
        }
    }

    /// Diff the live orbit against the snapshot at `path`.
    pub fn load_reference(&mut self, path: &Path) -> Result<RefOutcome, ReferenceError> {
        let reference = match Orbit::from_matlab_file(path) {
            Ok(o) => o,
            Err(source) => {
                return Err(self.fail(ReferenceError::Load {
                    path: path.to_path_buf(),
                    source,
                }))
            }
        };
        let diff = match DiffOrbit::new(self.live.clone(), reference) {
            Ok(d) => d,
            Err(e) => {
                return Err(self.fail(ReferenceError::Incompatible {
                    path: path.to_path_buf(),
                    source: e,
                }))
            }
        };
        let handle = OrbitHandle::diff(diff);
        for v in self.views.iter_mut() {
            v.set_orbit(handle.clone(), false);
        }
        self.diff = Some((path.to_path_buf(), handle));
        info!(screen = %self.title, path = %path.display(), "showing orbit difference to reference");
        self.push_status(format!("reference loaded: {}", path.display()));
        Ok(RefOutcome::Diff(path.to_path_buf()))
    }

    /// Bind every view to the live orbit and forget the reference.
    pub fn show_live(&mut self) {
        self.diff = None;
        let handle = OrbitHandle::Live(self.live.clone());
        for v in self.views.iter_mut() {
            v.set_orbit(handle.clone(), false);
        }
    }

    fn update_labels(&mut self, refs: &CurrentRefs) {
        for kind in self.label_kinds.clone() {
            let text = match refs.get(kind).readable_ts() {
                Ok(t) => t,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "reference timestamp unreadable");
                    INVALID_REFERENCE_TEXT.to_string()
                }
            };
            self.labels.insert(kind, text);
        }
    }

    fn fail(&mut self, e: ReferenceError) -> ReferenceError {
        error!(screen = %self.title, error = %e, "reference update failed");
        match self.policy {
            RefFailurePolicy::FallBackToLive => {
                self.show_live();
                self.push_status(format!("reference failed, showing live orbit: {e}"));
            }
            RefFailurePolicy::KeepPrevious if self.diff.is_some() => {
                self.push_status(format!("reference failed, keeping previous reference: {e}"));
            }
            RefFailurePolicy::KeepPrevious => {
                self.show_live();
                self.push_status(format!("reference failed, showing live orbit: {e}"));
            }
        }
        e
    }
}
