//! Generated object filenames: 16 random bytes as hex plus the extension of
//! the uploader's original name.

use rand::RngCore;
use std::path::Path;

const RANDOM_BYTES: usize = 16;
const MAX_EXTENSION_LEN: usize = 16;

/// Source of the random bytes behind generated filenames.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Thread-local CSPRNG seeded from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }
}

/// Build `hex(random) + extension(original)`.
pub fn generate(random: &dyn RandomSource, original: &str) -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    random.fill(&mut bytes);
    format!("{}{}", hex::encode(bytes), extension(original))
}

/// Extension of the last path component including the dot, or empty.
///
/// Extensions longer than 16 characters or containing anything other than
/// ASCII alphanumerics are dropped, so the generated name is always a flat,
/// header-safe token.
pub fn extension(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    match Path::new(base).extension().and_then(|ext| ext.to_str()) {
        Some(ext)
            if ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext)
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u8);

    impl RandomSource for Fixed {
        fn fill(&self, buf: &mut [u8]) {
            buf.fill(self.0);
        }
    }

    #[test]
    fn keeps_original_extension() {
        let name = generate(&Fixed(0xab), "holiday.jpeg");
        assert_eq!(name, format!("{}.jpeg", "ab".repeat(16)));
    }

    #[test]
    fn no_extension_yields_bare_hex() {
        let name = generate(&Fixed(0), "README");
        assert_eq!(name, "0".repeat(32));
    }

    #[test]
    fn extension_edge_cases() {
        assert_eq!(extension("archive.tar.gz"), ".gz");
        assert_eq!(extension(".bashrc"), "");
        assert_eq!(extension("photos/2025/cat.PNG"), ".PNG");
        assert_eq!(extension("C:\\Users\\me\\pic.png"), ".png");
        assert_eq!(extension("evil.p\"ng"), "");
        assert_eq!(extension(""), "");
    }

    #[test]
    fn os_random_names_differ() {
        let a = generate(&OsRandom, "x.png");
        let b = generate(&OsRandom, "x.png");
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }
}
