//! HLS manifest parsing
//!
//! Pure, synchronous line-oriented parser for master and media playlists.
//! Relative URIs are resolved against the manifest's own URL. Unknown tags
//! are tolerated and skipped; only the magic header and the tags the
//! pipeline relies on are enforced.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("not an HLS playlist: missing #EXTM3U header")]
    MissingHeader,
    #[error("master playlist has no usable variant streams")]
    NoVariants,
    #[error("media playlist missing #EXT-X-TARGETDURATION")]
    MissingTargetDuration,
    #[error("invalid manifest url: {0}")]
    BadBaseUrl(String),
}

/// One entry of a master playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub codecs: Option<String>,
    pub uri: String,
}

/// One entry of a media playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration_sec: f64,
    pub discontinuity: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration_sec: f64,
    pub media_sequence: u64,
    pub is_endlist: bool,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

/// Parse a manifest body fetched from `base_url`.
///
/// A playlist containing `#EXT-X-STREAM-INF` entries is a master playlist;
/// everything else must be a media playlist carrying a target duration.
pub fn parse(body: &str, base_url: &str) -> Result<Playlist, PlaylistError> {
    let base = Url::parse(base_url).map_err(|e| PlaylistError::BadBaseUrl(e.to_string()))?;

    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some(first) if first.starts_with("#EXTM3U") => {}
        _ => return Err(PlaylistError::MissingHeader),
    }

    let lines: Vec<&str> = lines.collect();
    if lines.iter().any(|l| l.starts_with("#EXT-X-STREAM-INF:")) {
        parse_master(&lines, &base)
    } else {
        parse_media(&lines, &base)
    }
}

fn parse_master(lines: &[&str], base: &Url) -> Result<Playlist, PlaylistError> {
    let mut variants = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            // the URI is the next non-tag line
            if let Some(uri) = lines.get(i + 1).filter(|l| !l.starts_with('#')) {
                let attrs = parse_attribute_list(attrs);
                let bandwidth = attrs
                    .iter()
                    .find(|(k, _)| k == "BANDWIDTH")
                    .and_then(|(_, v)| v.parse().ok());
                if let Some(bandwidth) = bandwidth {
                    variants.push(Variant {
                        bandwidth,
                        resolution: attr_value(&attrs, "RESOLUTION"),
                        codecs: attr_value(&attrs, "CODECS"),
                        uri: resolve(base, uri),
                    });
                }
                i += 1;
            }
        }
        i += 1;
    }

    if variants.is_empty() {
        return Err(PlaylistError::NoVariants);
    }
    Ok(Playlist::Master(variants))
}

fn parse_media(lines: &[&str], base: &Url) -> Result<Playlist, PlaylistError> {
    let mut target_duration = None;
    let mut media_sequence = 0;
    let mut is_endlist = false;
    let mut segments = Vec::new();

    let mut pending_duration: Option<f64> = None;
    let mut pending_discontinuity = false;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = value.parse::<f64>().ok();
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = value.parse().unwrap_or(0);
        } else if *line == "#EXT-X-ENDLIST" {
            is_endlist = true;
        } else if *line == "#EXT-X-DISCONTINUITY" {
            pending_discontinuity = true;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().and_then(|d| d.parse().ok());
            pending_duration = duration;
        } else if !line.starts_with('#') {
            // URI line; belongs to the preceding EXTINF
            if let Some(duration_sec) = pending_duration.take() {
                segments.push(Segment {
                    uri: resolve(base, line),
                    duration_sec,
                    discontinuity: pending_discontinuity,
                });
                pending_discontinuity = false;
            }
        }
        // any other tag is skipped
    }

    let target_duration_sec = target_duration.ok_or(PlaylistError::MissingTargetDuration)?;
    Ok(Playlist::Media(MediaPlaylist {
        target_duration_sec,
        media_sequence,
        is_endlist,
        segments,
    }))
}

fn resolve(base: &Url, uri: &str) -> String {
    match base.join(uri) {
        Ok(url) => url.to_string(),
        Err(_) => uri.to_string(),
    }
}

fn attr_value(attrs: &[(String, String)], key: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Split an attribute list (`KEY=value,KEY="quoted,value"`) respecting
/// quoted values, which may contain commas (CODECS does).
fn parse_attribute_list(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];

        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            match stripped.find('"') {
                Some(end) => {
                    value = stripped[..end].to_string();
                    rest = stripped[end + 1..].trim_start_matches(',');
                }
                None => {
                    value = stripped.to_string();
                    rest = "";
                }
            }
        } else {
            match rest.find(',') {
                Some(end) => {
                    value = rest[..end].to_string();
                    rest = &rest[end + 1..];
                }
                None => {
                    value = rest.to_string();
                    rest = "";
                }
            }
        }
        attrs.push((key, value));
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://cdn.example.com/live/stream.m3u8";

    #[test]
    fn rejects_body_without_magic_line() {
        let err = parse("<html>not a playlist</html>", BASE).unwrap_err();
        assert_eq!(err, PlaylistError::MissingHeader);
    }

    #[test]
    fn parses_master_playlist_with_quoted_codecs() {
        let body = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401f,mp4a.40.2\"\n\
            low/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\n\
            hi/index.m3u8\n";
        let Playlist::Master(variants) = parse(body, BASE).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].bandwidth, 800_000);
        assert_eq!(
            variants[0].codecs.as_deref(),
            Some("avc1.4d401f,mp4a.40.2")
        );
        assert_eq!(
            variants[1].uri,
            "http://cdn.example.com/live/hi/index.m3u8"
        );
    }

    #[test]
    fn parses_media_playlist_and_resolves_uris() {
        let body = "#EXTM3U\n\
            #EXT-X-VERSION:3\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-MEDIA-SEQUENCE:42\n\
            #EXTINF:6.006,\n\
            seg42.ts\n\
            #EXT-X-DISCONTINUITY\n\
            #EXTINF:5.994,\n\
            seg43.ts\n";
        let Playlist::Media(playlist) = parse(body, BASE).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(playlist.target_duration_sec, 6.0);
        assert_eq!(playlist.media_sequence, 42);
        assert!(!playlist.is_endlist);
        assert_eq!(playlist.segments.len(), 2);
        assert_eq!(
            playlist.segments[0].uri,
            "http://cdn.example.com/live/seg42.ts"
        );
        assert!(!playlist.segments[0].discontinuity);
        assert!(playlist.segments[1].discontinuity);
        assert_eq!(playlist.segments[1].duration_sec, 5.994);
    }

    #[test]
    fn media_playlist_requires_target_duration() {
        let body = "#EXTM3U\n#EXTINF:6.0,\nseg1.ts\n";
        let err = parse(body, BASE).unwrap_err();
        assert_eq!(err, PlaylistError::MissingTargetDuration);
    }

    #[test]
    fn endlist_and_absolute_uris_are_honored() {
        let body = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:4\n\
            #EXTINF:4.0,\n\
            https://other.example.net/abs/seg1.ts\n\
            #EXT-X-ENDLIST\n";
        let Playlist::Media(playlist) = parse(body, BASE).unwrap() else {
            panic!("expected media playlist");
        };
        assert!(playlist.is_endlist);
        assert_eq!(
            playlist.segments[0].uri,
            "https://other.example.net/abs/seg1.ts"
        );
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let body = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-PROGRAM-DATE-TIME:2026-01-01T00:00:00Z\n\
            #EXT-X-SOMETHING-CUSTOM:value\n\
            #EXTINF:6.0,\n\
            seg1.ts\n";
        let Playlist::Media(playlist) = parse(body, BASE).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(playlist.segments.len(), 1);
    }

    #[test]
    fn master_variant_without_bandwidth_is_skipped() {
        let body = "#EXTM3U\n\
            #EXT-X-STREAM-INF:RESOLUTION=640x360\n\
            low/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1000000\n\
            mid/index.m3u8\n";
        let Playlist::Master(variants) = parse(body, BASE).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].bandwidth, 1_000_000);
    }
}
