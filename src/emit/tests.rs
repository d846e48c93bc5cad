use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mockall::predicate::*;
use tempfile::TempDir;

use super::*;
use crate::library::{PlaylistForest, Track};
use crate::naming::{NameSanitizer, NamingError, UniqueNameResolver};
use crate::path_validator::{LocalFilesystem, PathValidator, RejectReason};

// ============================================================================
// Fixtures
// ============================================================================

struct Crates {
    dir: TempDir,
}

impl Crates {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn add(&self, relative: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"audio").unwrap();
        path
    }

    fn validator(&self) -> PathValidator<LocalFilesystem> {
        PathValidator::local(self.dir.path(), "/data/music", false).unwrap()
    }
}

fn track(path: &Path, title: &str) -> Arc<Track> {
    Arc::new(Track::new(path, "Artist", title))
}

fn emitter<'a>(
    validator: &'a PathValidator<LocalFilesystem>,
    layout: Layout,
    out: &Path,
) -> PlaylistEmitter<'a, LocalFilesystem> {
    PlaylistEmitter::new(
        validator,
        UniqueNameResolver::default(),
        EmitOptions::new(layout, out),
    )
}

fn emit_to_disk(
    forest: &PlaylistForest,
    validator: &PathValidator<LocalFilesystem>,
    layout: Layout,
    out: &Path,
) -> EmitReport {
    emitter(validator, layout, out)
        .emit(forest, &mut FilesystemSink)
        .unwrap()
}

/// Relative path -> contents for every playlist file under `dir`
fn snapshot(dir: &Path) -> BTreeMap<String, String> {
    list_playlist_files(dir)
        .into_iter()
        .map(|path| {
            let contents = std::fs::read_to_string(&path).unwrap();
            let relative = path.strip_prefix(dir).unwrap().to_string_lossy().to_string();
            (relative, contents)
        })
        .collect()
}

/// House (a) > Deep (b) > Dub (c)
fn house_forest(crates: &Crates) -> PlaylistForest {
    let mut forest = PlaylistForest::new();
    let house = forest.add_root("House");
    forest.push_track(house, track(&crates.add("House/a.mp3"), "A"));
    let deep = forest.add_child(house, "Deep");
    forest.push_track(deep, track(&crates.add("House/b.mp3"), "B"));
    let dub = forest.add_child(deep, "Dub");
    forest.push_track(dub, track(&crates.add("Dub/c.flac"), "C"));
    forest
}

// ============================================================================
// Layouts
// ============================================================================

#[test]
fn test_nested_layout_mirrors_hierarchy() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let forest = house_forest(&crates);

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Nested, out.path());

    let files = snapshot(out.path());
    assert_eq!(
        files.keys().collect::<Vec<_>>(),
        vec![
            "House/Deep/Deep.m3u",
            "House/Deep/Dub/Dub.m3u",
            "House/House.m3u"
        ]
    );
    assert_eq!(
        files["House/Deep/Deep.m3u"],
        "#EXTM3U\n#EXTINF:-1,Artist - B\n/data/music/House/b.mp3\n"
    );
    assert_eq!(report.playlists.len(), 3);
    assert_eq!(report.playlists[2].playlist, "House / Deep / Dub");
    assert_eq!(report.track_count(), 3);
}

#[test]
fn test_flat_layout_joins_ancestry() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let forest = house_forest(&crates);

    emit_to_disk(&forest, &crates.validator(), Layout::Flat, out.path());

    let files = snapshot(out.path());
    assert_eq!(
        files.keys().collect::<Vec<_>>(),
        vec!["House - Deep - Dub.m3u", "House - Deep.m3u", "House.m3u"]
    );
    assert_eq!(
        files["House - Deep - Dub.m3u"],
        "#EXTM3U\n#EXTINF:-1,Artist - C\n/data/music/Dub/c.flac\n"
    );
}

#[test]
fn test_flat_layout_uses_configured_separator() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let forest = house_forest(&crates);
    let validator = crates.validator();

    let mut options = EmitOptions::new(Layout::Flat, out.path());
    options.flat_separator = " _ ".to_string();
    PlaylistEmitter::new(&validator, UniqueNameResolver::default(), options)
        .emit(&forest, &mut FilesystemSink)
        .unwrap();

    assert!(out.path().join("House _ Deep _ Dub.m3u").is_file());
}

#[test]
fn test_flat_and_nested_write_the_same_playlists() {
    let crates = Crates::new();
    let nested_out = tempfile::tempdir().unwrap();
    let flat_out = tempfile::tempdir().unwrap();
    let mut forest = house_forest(&crates);
    let techno = forest.add_root("Techno");
    forest.push_track(techno, track(&crates.add("Techno/t.mp3"), "T"));
    let validator = crates.validator();

    let nested = emit_to_disk(&forest, &validator, Layout::Nested, nested_out.path());
    let flat = emit_to_disk(&forest, &validator, Layout::Flat, flat_out.path());

    let by_playlist = |report: &EmitReport| -> BTreeMap<String, usize> {
        report
            .playlists
            .iter()
            .map(|written| (written.playlist.clone(), written.tracks))
            .collect()
    };
    assert_eq!(by_playlist(&nested), by_playlist(&flat));

    for written in &nested.playlists {
        let depth = written.playlist.split(" / ").count();
        let components = written
            .file
            .strip_prefix(nested_out.path())
            .unwrap()
            .components()
            .count();
        assert_eq!(components, depth + 1, "{}", written.file.display());
    }
    for written in &flat.playlists {
        assert_eq!(written.file.parent().unwrap(), flat_out.path());
    }

    let mut nested_contents: Vec<_> = snapshot(nested_out.path()).into_values().collect();
    let mut flat_contents: Vec<_> = snapshot(flat_out.path()).into_values().collect();
    nested_contents.sort();
    flat_contents.sort();
    assert_eq!(nested_contents, flat_contents);
}

// ============================================================================
// Validation and empty nodes
// ============================================================================

#[test]
fn test_invalid_paths_are_excluded() {
    let crates = Crates::new();
    let elsewhere = tempfile::tempdir().unwrap();
    let outside = elsewhere.path().join("stolen.mp3");
    std::fs::write(&outside, b"audio").unwrap();
    let out = tempfile::tempdir().unwrap();

    let mut forest = PlaylistForest::new();
    let mix = forest.add_root("Mix");
    forest.push_track(mix, track(&crates.add("one.mp3"), "One"));
    forest.push_track(mix, track(&outside, "Stolen"));
    forest.push_track(mix, track(&crates.add("two.mp3"), "Two"));

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Nested, out.path());

    let contents = std::fs::read_to_string(out.path().join("Mix/Mix.m3u")).unwrap();
    assert_eq!(
        contents,
        "#EXTM3U\n\
         #EXTINF:-1,Artist - One\n\
         /data/music/one.mp3\n\
         #EXTINF:-1,Artist - Two\n\
         /data/music/two.mp3\n"
    );
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].reason, RejectReason::OutsideRoot);
    assert_eq!(report.rejections[0].playlist, "Mix");
    assert_eq!(report.accepted.len(), 2);
}

#[test]
fn test_empty_forest_writes_nothing() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();

    let report = emit_to_disk(
        &PlaylistForest::new(),
        &crates.validator(),
        Layout::Nested,
        out.path(),
    );

    assert!(report.playlists.is_empty());
    assert!(report.directories.is_empty());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_nodes_without_valid_tracks_write_no_file() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();

    let mut forest = PlaylistForest::new();
    let folder = forest.add_root("Folder");
    forest.add_child(folder, "Empty");
    let broken = forest.add_child(folder, "Broken");
    forest.push_track(broken, track(Path::new("/nowhere/near/the/crates.mp3"), "Gone"));
    let full = forest.add_child(folder, "Full");
    forest.push_track(full, track(&crates.add("full.mp3"), "Full"));
    forest.add_root("Nothing");

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Nested, out.path());

    assert_eq!(
        snapshot(out.path()).keys().collect::<Vec<_>>(),
        vec!["Folder/Full/Full.m3u"]
    );
    assert!(out.path().join("Folder").is_dir());
    assert!(!out.path().join("Folder/Folder.m3u").exists());
    assert!(!out.path().join("Folder/Empty").exists());
    assert!(!out.path().join("Folder/Broken").exists());
    assert!(!out.path().join("Nothing").exists());
    assert_eq!(report.rejections.len(), 1);
    assert_eq!(report.rejections[0].playlist, "Folder / Broken");
}

#[test]
fn test_shared_tracks_sync_once() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let shared = track(&crates.add("shared.mp3"), "Shared");

    let mut forest = PlaylistForest::new();
    let first = forest.add_root("First");
    forest.push_track(first, Arc::clone(&shared));
    let second = forest.add_root("Second");
    forest.push_track(second, shared);

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Flat, out.path());

    assert_eq!(report.accepted.len(), 2);
    let plan = report.sync_plan();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].destination_path, "/data/music/shared.mp3");
    assert_eq!(plan[0].relative_path, "shared.mp3");
}

// ============================================================================
// Naming
// ============================================================================

#[test]
fn test_sibling_collisions_get_suffixes() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let media = crates.add("a.mp3");

    let mut forest = PlaylistForest::new();
    for name in ["Mix", "Mix", "mix"] {
        let node = forest.add_root(name);
        forest.push_track(node, track(&media, name));
    }

    emit_to_disk(&forest, &crates.validator(), Layout::Nested, out.path());

    assert_eq!(
        snapshot(out.path()).keys().collect::<Vec<_>>(),
        vec!["Mix (1)/Mix (1).m3u", "Mix/Mix.m3u", "mix (2)/mix (2).m3u"]
    );
}

#[test]
fn test_separator_variants_collide_in_flat_layout() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let media = crates.add("a.mp3");

    let mut forest = PlaylistForest::new();
    for name in ["Plugin ears / Hovercat", "Plugin ears  Hovercat"] {
        let node = forest.add_root(name);
        forest.push_track(node, track(&media, name));
    }

    emit_to_disk(&forest, &crates.validator(), Layout::Flat, out.path());

    assert_eq!(
        snapshot(out.path()).keys().collect::<Vec<_>>(),
        vec![
            "Plugin ears - Hovercat (1).m3u",
            "Plugin ears - Hovercat.m3u"
        ]
    );
}

#[test]
fn test_same_name_in_different_folders_is_not_suffixed() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();
    let media = crates.add("a.mp3");

    let mut forest = PlaylistForest::new();
    for folder in ["2023", "2024"] {
        let root = forest.add_root(folder);
        let best = forest.add_child(root, "Best Of");
        forest.push_track(best, track(&media, "A"));
    }

    emit_to_disk(&forest, &crates.validator(), Layout::Nested, out.path());

    assert_eq!(
        snapshot(out.path()).keys().collect::<Vec<_>>(),
        vec!["2023/Best Of/Best Of.m3u", "2024/Best Of/Best Of.m3u"]
    );
}

#[test]
fn test_unusable_names_use_fallback() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();

    let mut forest = PlaylistForest::new();
    let node = forest.add_root("???");
    forest.push_track(node, track(&crates.add("a.mp3"), "A"));

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Flat, out.path());

    assert_eq!(report.fallback_names, vec!["???".to_string()]);
    assert_eq!(report.playlists.len(), 1);
    assert!(report.playlists[0].file.starts_with(out.path()));
}

#[test]
fn test_unusable_nested_names_are_reported_once() {
    let crates = Crates::new();
    let out = tempfile::tempdir().unwrap();

    let mut forest = PlaylistForest::new();
    let folder = forest.add_root("Sets");
    let node = forest.add_child(folder, "***");
    forest.push_track(node, track(&crates.add("a.mp3"), "A"));

    let report = emit_to_disk(&forest, &crates.validator(), Layout::Flat, out.path());
    assert!(report.fallback_names.is_empty());
    assert!(out.path().join("Sets.m3u").is_file());

    let nested_out = tempfile::tempdir().unwrap();
    let report = emit_to_disk(&forest, &crates.validator(), Layout::Nested, nested_out.path());
    assert_eq!(report.fallback_names, vec!["***".to_string()]);
    assert!(nested_out.path().join("Sets/untitled/untitled.m3u").is_file());
}

#[test]
fn test_collision_bound_aborts_the_pass() {
    let crates = Crates::new();
    let media = crates.add("a.mp3");
    let validator = crates.validator();

    let mut forest = PlaylistForest::new();
    for _ in 0..4 {
        let node = forest.add_root("Mix");
        forest.push_track(node, track(&media, "A"));
    }

    let resolver = UniqueNameResolver::new(NameSanitizer::default(), true, 2);
    let result = PlaylistEmitter::new(
        &validator,
        resolver,
        EmitOptions::new(Layout::Flat, "/unused"),
    )
    .emit(&forest, &mut DryRunSink::default());

    match result {
        Err(EmitError::Naming(NamingError::CollisionBoundExceeded { raw, bound, .. })) => {
            assert_eq!(raw, "Mix");
            assert_eq!(bound, 2);
        }
        other => panic!("expected a collision failure, got {:?}", other.map(|r| r.playlists)),
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[test]
fn test_writes_go_through_the_sink_in_order() {
    let crates = Crates::new();
    let mut forest = PlaylistForest::new();
    let mix = forest.add_root("Mix");
    forest.push_track(mix, track(&crates.add("a.mp3"), "A"));
    let out = PathBuf::from("/srv/playlists");

    let mut sink = MockOutputSink::new();
    let mut seq = mockall::Sequence::new();
    sink.expect_create_dir()
        .with(eq(out.join("Mix")))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    sink.expect_write_file()
        .with(eq(out.join("Mix").join("Mix.m3u")), always())
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));

    let validator = crates.validator();
    let report = emitter(&validator, Layout::Nested, &out)
        .emit(&forest, &mut sink)
        .unwrap();
    assert_eq!(report.directories, vec![out.join("Mix")]);
}

#[test]
fn test_write_failure_aborts_the_pass() {
    let crates = Crates::new();
    let mut forest = PlaylistForest::new();
    for name in ["First", "Second"] {
        let node = forest.add_root(name);
        forest.push_track(node, track(&crates.add("a.mp3"), "A"));
    }

    let mut sink = MockOutputSink::new();
    sink.expect_create_dir().returning(|_| Ok(()));
    sink.expect_write_file()
        .times(1)
        .returning(|_, _| Err(io::Error::other("disk full")));

    let validator = crates.validator();
    let result = emitter(&validator, Layout::Nested, Path::new("/srv/playlists"))
        .emit(&forest, &mut sink);

    match result {
        Err(EmitError::WriteFailure {
            operation,
            path,
            error_message,
        }) => {
            assert_eq!(operation, "write playlist");
            assert_eq!(path, "/srv/playlists/First/First.m3u");
            assert_eq!(error_message, "disk full");
        }
        other => panic!("expected a write failure, got {:?}", other.map(|r| r.playlists)),
    }
}

#[test]
fn test_dry_run_touches_nothing() {
    let crates = Crates::new();
    let base = tempfile::tempdir().unwrap();
    let out = base.path().join("never");
    let forest = house_forest(&crates);
    let validator = crates.validator();

    let mut sink = DryRunSink::default();
    let report = emitter(&validator, Layout::Nested, &out)
        .emit(&forest, &mut sink)
        .unwrap();

    assert!(!out.exists());
    assert_eq!(sink.files.len(), 3);
    assert_eq!(sink.directories.len(), 3);
    assert_eq!(sink.files[0].0, out.join("House").join("House.m3u"));
    assert_eq!(report.playlists.len(), 3);
}

// ============================================================================
// Output directory
// ============================================================================

#[test]
fn test_repeated_runs_are_identical() {
    let crates = Crates::new();
    let base = tempfile::tempdir().unwrap();
    let out = base.path().join("output");
    let forest = house_forest(&crates);
    let validator = crates.validator();

    clean_output_directory(&out, &[validator.source_root()]).unwrap();
    emit_to_disk(&forest, &validator, Layout::Nested, &out);
    let first = snapshot(&out);

    clean_output_directory(&out, &[validator.source_root()]).unwrap();
    emit_to_disk(&forest, &validator, Layout::Nested, &out);

    assert_eq!(first, snapshot(&out));
    assert_eq!(first.len(), 3);
}

#[test]
fn test_clean_removes_stale_playlists() {
    let base = tempfile::tempdir().unwrap();
    let out = base.path().join("output");
    std::fs::create_dir_all(out.join("Old")).unwrap();
    std::fs::write(out.join("Old/Old.m3u"), "#EXTM3U\n").unwrap();

    clean_output_directory(&out, &[]).unwrap();

    assert!(out.is_dir());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_clean_creates_missing_directory() {
    let base = tempfile::tempdir().unwrap();
    let out = base.path().join("a").join("b");

    clean_output_directory(&out, &[]).unwrap();
    assert!(out.is_dir());
}

#[test]
fn test_clean_refuses_directory_holding_the_crates() {
    let base = tempfile::tempdir().unwrap();
    let crates = base.path().join("crates");
    std::fs::create_dir_all(&crates).unwrap();
    std::fs::write(crates.join("keep.mp3"), b"audio").unwrap();

    let result = clean_output_directory(base.path(), &[crates.as_path()]);

    assert!(matches!(
        result,
        Err(EmitError::UnsafeOutputDirectory { .. })
    ));
    assert!(crates.join("keep.mp3").is_file());
}

#[test]
fn test_clean_refuses_filesystem_root() {
    assert!(matches!(
        clean_output_directory(Path::new("/"), &[]),
        Err(EmitError::UnsafeOutputDirectory { .. })
    ));
}
