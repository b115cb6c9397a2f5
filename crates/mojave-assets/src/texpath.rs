//! Texture path recovery
//!
//! The engine keeps a texture's source path in memory shortly before the
//! surface bytes, so a backward scan from a DDS/DDX header often recovers a
//! usable file name. Only printable ASCII runs that look like paths are
//! accepted; everything else stays anonymous.

/// How far back from the header the scan reaches
pub const SEARCH_WINDOW: usize = 1024;

/// Shortest run worth considering
const MIN_RUN: usize = 4;

const TEXTURE_EXTENSIONS: [&str; 4] = [".dds", ".ddx", ".tga", ".bmp"];

/// A recovered texture path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePath {
    /// The full path string as found in memory
    pub path: String,
    /// Sanitized basename suitable for a file on disk
    pub file_name: String,
}

/// Scan backward from `offset` for a path-shaped ASCII run.
pub fn recover_texture_path(data: &[u8], offset: usize) -> Option<TexturePath> {
    let window_start = offset.saturating_sub(SEARCH_WINDOW);
    let window = &data[window_start..offset.min(data.len())];

    // Walk runs from the nearest to the farthest
    let mut end = window.len();
    while end > 0 {
        if !is_printable(window[end - 1]) {
            end -= 1;
            continue;
        }
        let mut start = end;
        while start > 0 && is_printable(window[start - 1]) {
            start -= 1;
        }
        let run = &window[start..end];
        if let Some(found) = accept_run(run) {
            return Some(found);
        }
        end = start;
    }
    None
}

fn accept_run(run: &[u8]) -> Option<TexturePath> {
    if run.len() < MIN_RUN {
        return None;
    }
    let text = std::str::from_utf8(run).ok()?;
    if !text.contains('/') && !text.contains('\\') {
        return None;
    }

    let lowered = text.to_ascii_lowercase();
    let has_known_extension = TEXTURE_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext));
    // Path-like shape: a dot in the component after the last separator
    let basename_at = text.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let path_shaped = text[basename_at..].contains('.');

    if !has_known_extension && !path_shaped {
        return None;
    }

    let file_name = sanitize_file_name(&text[basename_at..]);
    if file_name.is_empty() {
        return None;
    }

    Some(TexturePath {
        path: text.to_string(),
        file_name,
    })
}

fn is_printable(b: u8) -> bool {
    (0x20..0x7F).contains(&b)
}

/// Replace the characters Windows forbids in file names
pub fn sanitize_file_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(path: &[u8], gap: usize) -> (Vec<u8>, usize) {
        let mut data = vec![0u8; 64];
        data.extend_from_slice(path);
        data.extend_from_slice(&vec![0u8; gap]);
        let offset = data.len();
        data.extend_from_slice(b"DDS ");
        (data, offset)
    }

    #[test]
    fn recovers_path_before_header() {
        let (data, offset) = plant(b"textures/armor/combat.dds", 3);
        let found = recover_texture_path(&data, offset).unwrap();
        assert_eq!(found.path, "textures/armor/combat.dds");
        assert_eq!(found.file_name, "combat.dds");
    }

    #[test]
    fn backslash_paths_and_sanitization() {
        let (data, offset) = plant(b"textures\\interface\\hud:glass.dds", 0);
        let found = recover_texture_path(&data, offset).unwrap();
        assert_eq!(found.file_name, "hud_glass.dds");
    }

    #[test]
    fn skips_non_path_noise() {
        let (data, offset) = plant(b"zzzz just words zzzz", 2);
        assert!(recover_texture_path(&data, offset).is_none());
    }

    #[test]
    fn run_outside_window_is_missed() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(b"textures/far.dds");
        data.extend_from_slice(&vec![0u8; SEARCH_WINDOW + 16]);
        let offset = data.len();
        data.extend_from_slice(b"DDS ");
        assert!(recover_texture_path(&data, offset).is_none());
    }

    #[test]
    fn nearest_run_wins() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"textures/old.dds");
        data.push(0);
        data.extend_from_slice(b"textures/new.dds");
        data.push(0);
        let offset = data.len();
        data.extend_from_slice(b"DDS ");
        let found = recover_texture_path(&data, offset).unwrap();
        assert_eq!(found.file_name, "new.dds");
    }

    #[test]
    fn short_runs_are_ignored() {
        let (data, offset) = plant(b"a/b", 1);
        assert!(recover_texture_path(&data, offset).is_none());
    }
}
