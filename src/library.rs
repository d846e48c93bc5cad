use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const ROOT_PARENT_ID: &str = "root";
const UNKNOWN: &str = "Unknown";

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Failed to read library export {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse library export {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A media file referenced by one or more playlists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub source_path: PathBuf,
    pub artist: String,
    pub title: String,
    pub duration_seconds: Option<u32>,
}

impl Track {
    pub fn new(source_path: impl Into<PathBuf>, artist: &str, title: &str) -> Self {
        Self {
            source_path: source_path.into(),
            artist: artist.to_string(),
            title: title.to_string(),
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PlaylistNode {
    pub name: String,
    pub tracks: Vec<Arc<Track>>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

/// Arena of playlist nodes. Children can only be attached to nodes that
/// already exist, so the forest never contains a cycle.
#[derive(Debug, Clone, Default)]
pub struct PlaylistForest {
    nodes: Vec<PlaylistNode>,
    roots: Vec<NodeId>,
}

impl PlaylistForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&mut self, name: &str) -> NodeId {
        let id = self.push_node(name, None);
        self.roots.push(id);
        id
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.push_node(name, Some(parent));
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn push_track(&mut self, node: NodeId, track: Arc<Track>) {
        self.nodes[node.0].tracks.push(track);
    }

    fn push_node(&mut self, name: &str, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PlaylistNode {
            name: name.to_string(),
            tracks: Vec::new(),
            children: Vec::new(),
            parent,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &PlaylistNode {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in depth-first order, children in their original order
    pub fn depth_first(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Raw names from the root down to `id`, inclusive
    pub fn ancestry(&self, id: NodeId) -> Vec<&str> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            names.push(node.name.as_str());
            current = node.parent;
        }
        names.reverse();
        names
    }

    pub fn track_count(&self) -> usize {
        self.nodes.iter().map(|node| node.tracks.len()).sum()
    }
}

// ============================================================================
// Library export
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistKind {
    Folder,
    #[default]
    Playlist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedPlaylist {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub kind: PlaylistKind,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedTrack {
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub deleted: bool,
}

/// Flat playlist/track records as dumped from a DJ library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryExport {
    #[serde(default)]
    pub playlists: Vec<ExportedPlaylist>,
    #[serde(default)]
    pub tracks: Vec<ExportedTrack>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub deleted_playlists: usize,
    pub deleted_tracks: usize,
    pub detached_playlists: usize,
    pub missing_tracks: usize,
}

impl LibraryExport {
    pub fn from_file(path: &Path) -> Result<Self, LibraryError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LibraryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| LibraryError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Build the playlist forest, skipping deleted records and anything that
    /// cannot be attached to a root.
    pub fn into_forest(self) -> (PlaylistForest, LoadStats) {
        let mut stats = LoadStats::default();

        let mut tracks: HashMap<String, Option<Arc<Track>>> = HashMap::new();
        for exported in self.tracks {
            let track = if exported.deleted {
                None
            } else {
                Some(Arc::new(Track {
                    source_path: PathBuf::from(exported.path.unwrap_or_default()),
                    artist: non_empty_or_unknown(exported.artist),
                    title: non_empty_or_unknown(exported.title),
                    duration_seconds: exported.duration_seconds,
                }))
            };
            tracks.insert(exported.id, track);
        }

        let total = self.playlists.len();
        let live: Vec<(usize, ExportedPlaylist)> = self
            .playlists
            .into_iter()
            .enumerate()
            .filter(|(_, playlist)| {
                if playlist.deleted {
                    log::debug!("Skipping deleted playlist '{}'", playlist.name);
                }
                !playlist.deleted
            })
            .collect();
        stats.deleted_playlists = total - live.len();

        let ids: HashSet<&str> = live.iter().map(|(_, p)| p.id.as_str()).collect();
        let mut children_of: HashMap<Option<&str>, Vec<&(usize, ExportedPlaylist)>> =
            HashMap::new();
        for entry in &live {
            let parent = match entry.1.parent_id.as_deref() {
                None | Some(ROOT_PARENT_ID) | Some("") => None,
                Some(parent) => Some(parent),
            };
            children_of.entry(parent).or_default().push(entry);
        }
        for siblings in children_of.values_mut() {
            siblings.sort_by_key(|(index, playlist)| (playlist.position.unwrap_or(i64::MAX), *index));
        }

        let mut forest = PlaylistForest::new();
        let mut attached: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(Option<NodeId>, &(usize, ExportedPlaylist))> = children_of
            .get(&None)
            .map(|roots| roots.iter().rev().map(|entry| (None, *entry)).collect())
            .unwrap_or_default();

        while let Some((parent, entry)) = stack.pop() {
            let playlist = &entry.1;
            if !attached.insert(playlist.id.as_str()) {
                continue;
            }
            let node = match parent {
                None => forest.add_root(&playlist.name),
                Some(parent) => forest.add_child(parent, &playlist.name),
            };

            if playlist.kind == PlaylistKind::Playlist {
                let mut deleted_here = 0;
                for track_id in &playlist.tracks {
                    match tracks.get(track_id) {
                        Some(Some(track)) => forest.push_track(node, Arc::clone(track)),
                        Some(None) => deleted_here += 1,
                        None => {
                            log::warn!(
                                "Playlist '{}' references unknown track id {}",
                                playlist.name,
                                track_id
                            );
                            stats.missing_tracks += 1;
                        }
                    }
                }
                if deleted_here > 0 {
                    log::debug!(
                        "Playlist '{}': skipped {} deleted tracks",
                        playlist.name,
                        deleted_here
                    );
                }
                stats.deleted_tracks += deleted_here;
            }

            if let Some(children) = children_of.get(&Some(playlist.id.as_str())) {
                stack.extend(children.iter().rev().map(|child| (Some(node), *child)));
            }
        }

        for (_, playlist) in &live {
            if !attached.contains(playlist.id.as_str()) {
                let parent = playlist.parent_id.as_deref().unwrap_or_default();
                let reason = if ids.contains(parent) {
                    "its parent chain never reaches a root"
                } else {
                    "its parent is missing or deleted"
                };
                log::warn!("Dropping playlist '{}': {}", playlist.name, reason);
                stats.detached_playlists += 1;
            }
        }

        (forest, stats)
    }
}

fn non_empty_or_unknown(value: Option<String>) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => UNKNOWN.to_string(),
    }
}
