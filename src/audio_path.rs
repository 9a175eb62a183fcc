/*! Audio path arbiter.

Subsystems that want audio request a path: a (source, sink, priority)
triple. The arbiter is the single source of truth for who owns which
endpoint. Incompatible lower-priority paths get suspended when a more
important one shows up and resume when it goes away; an incompatible
request against an equal or higher priority path is denied.

Compatibility itself is platform knowledge (which pairings contend
for the same physical endpoint or routing matrix), so the arbiter
takes it as an oracle function.

The suspension bookkeeping is a little graph: every route remembers
whom it suspended and who suspended it. Releasing a route hands both
edge sets over to the neighbours so the relation stays transitive and
nothing dangles.

One internal mutex guards the tables, held only for the duration of a
call.
*/
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};

/// Sources an audio path can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input.
    Mic,
    /// Baseband from the RF stage.
    Rtx,
    /// Samples synthesised by the MCU.
    Mcu,
}

/// Sinks an audio path can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSink {
    /// Loudspeaker output.
    Speaker,
    /// Baseband towards the RF stage.
    Rtx,
    /// Samples consumed by the MCU.
    Mcu,
}

/// Path priority, totally ordered. Higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AudioPriority {
    /// Background activity.
    Bg = 1,
    /// Interface beeps.
    Beep = 2,
    /// Voice prompts.
    Prompt = 3,
    /// Receive audio.
    Rx = 4,
    /// Transmission.
    Tx = 5,
}

/// State of a path as seen by its holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Released, never granted, or unknown id.
    Closed,
    /// Active: samples may flow.
    Open,
    /// Pre-empted by a higher priority path.
    Suspended,
}

/// Opaque handle to a granted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathId(u32);

/// Endpoints and priority of a granted path.
#[derive(Debug, Clone, Copy)]
pub struct PathInfo {
    /// Source endpoint.
    pub source: AudioSource,
    /// Sink endpoint.
    pub sink: AudioSink,
    /// Priority it was granted at.
    pub priority: AudioPriority,
    /// Current status.
    pub status: PathStatus,
}

/// Compatibility oracle: true if the two paths can be active at the
/// same time.
pub type CompatibilityCheck = fn(AudioSource, AudioSink, AudioSource, AudioSink) -> bool;

/// Default oracle: two paths coexist iff they share neither source
/// nor sink.
pub fn endpoint_compatibility(
    s1: AudioSource,
    k1: AudioSink,
    s2: AudioSource,
    k2: AudioSink,
) -> bool {
    s1 != s2 && k1 != k2
}

#[derive(Debug)]
struct Route {
    source: AudioSource,
    sink: AudioSink,
    priority: AudioPriority,
    suspend_list: BTreeSet<u32>,
    suspended_by: BTreeSet<u32>,
}

impl Route {
    fn is_active(&self) -> bool {
        self.suspended_by.is_empty()
    }
}

#[derive(Debug, Default)]
struct Tables {
    routes: BTreeMap<u32, Route>,
    active: BTreeSet<u32>,
    counter: u32,
}

/// The audio path arbiter.
pub struct AudioPaths {
    tables: Mutex<Tables>,
    compatible: CompatibilityCheck,
}

impl Default for AudioPaths {
    fn default() -> Self {
        Self::new(endpoint_compatibility)
    }
}

impl AudioPaths {
    /// New arbiter with the given compatibility oracle.
    pub fn new(compatible: CompatibilityCheck) -> Self {
        Self {
            tables: Mutex::new(Tables {
                counter: 1,
                ..Tables::default()
            }),
            compatible,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Request a path.
    ///
    /// Returns `None` when an incompatible path of equal or higher
    /// priority is active. Otherwise all incompatible lower-priority
    /// paths are suspended and the new path comes back open.
    pub fn request(
        &self,
        source: AudioSource,
        sink: AudioSink,
        priority: AudioPriority,
    ) -> Option<PathId> {
        let mut t = self.lock();

        let mut to_suspend: BTreeSet<u32> = BTreeSet::new();
        for id in t.active.iter() {
            let route = &t.routes[id];
            if (self.compatible)(source, sink, route.source, route.sink) {
                continue;
            }
            if route.priority >= priority {
                trace!("audio path {source:?}→{sink:?} denied by active path {id}");
                return None;
            }
            to_suspend.insert(*id);
        }

        let new_id = t.counter;
        t.counter += 1;

        for id in to_suspend.iter() {
            t.active.remove(id);
            if let Some(route) = t.routes.get_mut(id) {
                route.suspended_by.insert(new_id);
            }
            debug!("audio path {id} suspended by {new_id}");
        }

        t.routes.insert(
            new_id,
            Route {
                source,
                sink,
                priority,
                suspend_list: to_suspend,
                suspended_by: BTreeSet::new(),
            },
        );
        t.active.insert(new_id);

        trace!("audio path {new_id} open: {source:?}→{sink:?} prio {priority:?}");
        Some(PathId(new_id))
    }

    /// Status of a path, constant time.
    #[must_use]
    pub fn status(&self, id: PathId) -> PathStatus {
        let t = self.lock();
        match t.routes.get(&id.0) {
            None => PathStatus::Closed,
            Some(route) if route.is_active() => PathStatus::Open,
            Some(_) => PathStatus::Suspended,
        }
    }

    /// Endpoints, priority and status of a path.
    #[must_use]
    pub fn info(&self, id: PathId) -> Option<PathInfo> {
        let t = self.lock();
        t.routes.get(&id.0).map(|route| PathInfo {
            source: route.source,
            sink: route.sink,
            priority: route.priority,
            status: if route.is_active() {
                PathStatus::Open
            } else {
                PathStatus::Suspended
            },
        })
    }

    /// Release a path.
    ///
    /// Suspension edges are handed over to the neighbours: routes
    /// this one had suspended either resume (when nothing else holds
    /// them) or inherit this route's suspenders.
    pub fn release(&self, id: PathId) {
        let mut t = self.lock();

        let Some(removed) = t.routes.remove(&id.0) else {
            return;
        };
        t.active.remove(&id.0);
        debug!("audio path {} released", id.0);

        // Paths that suspended me pick up everything I had suspended.
        for other in removed.suspended_by.iter() {
            if let Some(route) = t.routes.get_mut(other) {
                route.suspend_list.remove(&id.0);
                route.suspend_list.extend(removed.suspend_list.iter());
            }
        }

        // Paths I suspended lose me and either resume or inherit my
        // suspenders.
        for other in removed.suspend_list.iter() {
            let Some(route) = t.routes.get_mut(other) else {
                continue;
            };
            route.suspended_by.remove(&id.0);
            if removed.suspended_by.is_empty() {
                if route.suspended_by.is_empty() {
                    t.active.insert(*other);
                    debug!("audio path {other} resumed");
                }
            } else {
                route.suspended_by.extend(removed.suspended_by.iter());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AudioPriority::*;
    use AudioSink as Sink;
    use AudioSource as Src;

    #[test]
    fn grant_and_release() {
        let paths = AudioPaths::default();
        let id = paths.request(Src::Mic, Sink::Rtx, Tx).unwrap();
        assert_eq!(paths.status(id), PathStatus::Open);
        paths.release(id);
        assert_eq!(paths.status(id), PathStatus::Closed);
    }

    #[test]
    fn higher_priority_suspends_lower() {
        let paths = AudioPaths::default();
        let rx = paths.request(Src::Rtx, Sink::Speaker, Rx).unwrap();
        // Same sink: incompatible, higher priority.
        let tx = paths.request(Src::Mic, Sink::Speaker, Tx).unwrap();
        assert_eq!(paths.status(rx), PathStatus::Suspended);
        assert_eq!(paths.status(tx), PathStatus::Open);

        paths.release(tx);
        assert_eq!(paths.status(rx), PathStatus::Open);
    }

    #[test]
    fn equal_priority_is_denied() {
        let paths = AudioPaths::default();
        let _beep = paths.request(Src::Mcu, Sink::Speaker, Beep).unwrap();
        assert!(paths.request(Src::Rtx, Sink::Speaker, Beep).is_none());
        assert!(paths.request(Src::Rtx, Sink::Speaker, Bg).is_none());
    }

    #[test]
    fn compatible_paths_coexist() {
        let paths = AudioPaths::default();
        let a = paths.request(Src::Mic, Sink::Rtx, Tx).unwrap();
        let b = paths.request(Src::Rtx, Sink::Speaker, Rx).unwrap();
        assert_eq!(paths.status(a), PathStatus::Open);
        assert_eq!(paths.status(b), PathStatus::Open);
    }

    #[test]
    fn released_triple_can_be_requested_again() {
        let paths = AudioPaths::default();
        let a = paths.request(Src::Mic, Sink::Speaker, Rx).unwrap();
        paths.release(a);
        let b = paths.request(Src::Mic, Sink::Speaker, Rx).unwrap();
        assert_eq!(paths.status(b), PathStatus::Open);
        assert_ne!(a, b, "ids are never reused");
    }

    #[test]
    fn suspension_chain_is_transitive() {
        let paths = AudioPaths::default();
        let bg = paths.request(Src::Mcu, Sink::Speaker, Bg).unwrap();
        let beep = paths.request(Src::Rtx, Sink::Speaker, Beep).unwrap();
        assert_eq!(paths.status(bg), PathStatus::Suspended);
        let tx = paths.request(Src::Mic, Sink::Speaker, Tx).unwrap();
        assert_eq!(paths.status(beep), PathStatus::Suspended);
        assert_eq!(paths.status(bg), PathStatus::Suspended);

        // Releasing the middle path hands its suspender on: bg must
        // stay down until tx goes away.
        paths.release(beep);
        assert_eq!(paths.status(bg), PathStatus::Suspended);
        paths.release(tx);
        assert_eq!(paths.status(bg), PathStatus::Open);
    }

    #[test]
    fn active_set_stays_pairwise_compatible() {
        // Pound the arbiter with a fixed sequence and check the
        // invariant after every step.
        let paths = AudioPaths::default();
        let sources = [Src::Mic, Src::Rtx, Src::Mcu];
        let sinks = [Sink::Speaker, Sink::Rtx, Sink::Mcu];
        let prios = [Bg, Beep, Prompt, Rx, Tx];

        let mut held: Vec<PathId> = Vec::new();
        for step in 0..200usize {
            let src = sources[step % 3];
            let sink = sinks[(step / 3) % 3];
            let prio = prios[(step / 9) % 5];
            if step % 4 == 3 && !held.is_empty() {
                let id = held.remove(step % held.len());
                paths.release(id);
            } else if let Some(id) = paths.request(src, sink, prio) {
                held.push(id);
            }

            let open: Vec<PathInfo> = held
                .iter()
                .filter_map(|id| paths.info(*id))
                .filter(|i| i.status == PathStatus::Open)
                .collect();
            for (i, a) in open.iter().enumerate() {
                for b in open.iter().skip(i + 1) {
                    assert!(
                        endpoint_compatibility(a.source, a.sink, b.source, b.sink),
                        "incompatible active pair at step {step}"
                    );
                }
            }
        }
    }
}
