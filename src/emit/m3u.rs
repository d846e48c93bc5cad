use crate::emit::ValidatedTrack;

pub const EXTENSION: &str = "m3u";
pub const HEADER: &str = "#EXTM3U";

/// Render an extended M3U playlist: the header line, then an `#EXTINF` line
/// and the destination path for every track.
pub fn render(tracks: &[ValidatedTrack]) -> String {
    let mut out = String::with_capacity(16 + tracks.len() * 96);
    out.push_str(HEADER);
    out.push('\n');
    for entry in tracks {
        let duration = entry
            .track
            .duration_seconds
            .map(i64::from)
            .unwrap_or(-1);
        out.push_str(&format!(
            "#EXTINF:{},{} - {}\n",
            duration,
            single_line(&entry.track.artist),
            single_line(&entry.track.title)
        ));
        out.push_str(entry.destination_path());
        out.push('\n');
    }
    out
}

/// Tag text must not be able to start a new line of the playlist
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
