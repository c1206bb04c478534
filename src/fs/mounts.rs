//! Parsing of `/proc/<pid>/mounts` tables.

use camino::{Utf8Path, Utf8PathBuf};

use super::FsError;

/// A single mount table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    /// Mounted device or pseudo filesystem source.
    pub device: String,
    /// Mount point.
    pub path: Utf8PathBuf,
    /// Filesystem type.
    pub fs_type: String,
}

/// Parses the whitespace separated `mounts` format.
///
/// Only the first three fields are kept; octal escapes (`\040` for space)
/// are decoded.
///
/// # Errors
///
/// Returns [`FsError::MountTable`] when a non-empty line has fewer than three
/// fields.
pub fn parse_mount_table(content: &str) -> Result<Vec<MountEntry>, FsError> {
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(device), Some(path), Some(fs_type)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(FsError::MountTable {
                line: line.to_owned(),
            });
        };
        entries.push(MountEntry {
            device: unescape(device),
            path: Utf8PathBuf::from(unescape(path)),
            fs_type: fs_type.to_owned(),
        });
    }
    Ok(entries)
}

/// Returns the mount point of the first entry whose device matches any of
/// `devices`.
#[must_use]
pub fn find_mount_point(entries: &[MountEntry], devices: &[&Utf8Path]) -> Option<Utf8PathBuf> {
    entries
        .iter()
        .find(|entry| devices.iter().any(|device| entry.device == device.as_str()))
        .map(|entry| entry.path.clone())
}

fn unescape(field: &str) -> String {
    let mut decoded = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let digits: String = chars.clone().take(3).collect();
            let is_octal = digits.len() == 3 && digits.chars().all(|d| ('0'..='7').contains(&d));
            if let Some(code) = is_octal
                .then(|| u8::from_str_radix(&digits, 8).ok())
                .flatten()
            {
                decoded.push(char::from(code));
                chars.nth(2);
                continue;
            }
        }
        decoded.push(ch);
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb /mnt/data ext4 rw,relatime,discard 0 0
/dev/sdc /mnt/with\\040space ext4 rw 0 0
";

    #[test]
    fn parses_entries_and_decodes_escapes() {
        let entries = parse_mount_table(TABLE).expect("table parses");
        assert_eq!(entries.len(), 4);
        let last = entries.last().expect("last entry");
        assert_eq!(last.path, Utf8PathBuf::from("/mnt/with space"));
        assert_eq!(last.fs_type, "ext4");
    }

    #[test]
    fn finds_mount_point_by_any_device_alias() {
        let entries = parse_mount_table(TABLE).expect("table parses");
        let found = find_mount_point(
            &entries,
            &[
                Utf8Path::new("/dev/disk/by-id/google-data"),
                Utf8Path::new("/dev/sdb"),
            ],
        );
        assert_eq!(found, Some(Utf8PathBuf::from("/mnt/data")));
        assert_eq!(find_mount_point(&entries, &[Utf8Path::new("/dev/sdz")]), None);
    }

    #[test]
    fn rejects_truncated_lines() {
        let err = parse_mount_table("/dev/sda1 /\n").expect_err("short line rejected");
        assert!(matches!(err, FsError::MountTable { .. }));
    }
}
