use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::hash::Hash;
use std::hash::Hasher;
use std::io;
use std::io::Read as _;
use std::path::Path;
use std::path::PathBuf;

use crate::wire::FileNameMessage;

/// The chunk size used when checksumming file contents, bounding memory
/// use on arbitrarily large files.
const CHUNK_SIZE: usize = 1024 * 1024;


/// The name of a source (or linked object) file, identified by its full
/// path and a checksum of its contents.
///
/// The checksum lets two files that share a path be told apart, e.g. a
/// stale object on one host and a rebuilt one on another. A checksum of
/// zero means "unknown" (typically a name that arrived over the wire
/// without one, or a file that could not be read) and compares equal to
/// any checksum for the same path. This graceful degradation is
/// deliberate and callers rely on it; it is not normalized into a strict
/// equivalence.
#[derive(Clone, Debug)]
pub struct FileName {
    /// The full path of the file.
    path: PathBuf,
    /// The checksum of the file's contents, or 0 when not computed.
    checksum: u64,
}

impl FileName {
    /// Construct a file name for the given path, checksumming the file's
    /// contents.
    ///
    /// When the path does not name a readable regular file the checksum
    /// silently remains zero; identity is best-effort.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let checksum = if path.is_file() {
            Self::compute_checksum(&path).unwrap_or(0)
        } else {
            0
        };
        Self { path, checksum }
    }

    /// Construct a file name from a path and an already-known checksum,
    /// e.g. one taken verbatim from a wire message. Nothing is
    /// recomputed.
    pub fn from_parts(path: impl Into<PathBuf>, checksum: u64) -> Self {
        Self {
            path: path.into(),
            checksum,
        }
    }

    /// Construct a file name from its wire representation.
    pub fn from_message(message: &FileNameMessage) -> Self {
        Self::from_parts(message.path.clone(), message.checksum)
    }

    /// Convert this file name into its wire representation.
    pub fn to_message(&self) -> FileNameMessage {
        FileNameMessage {
            path: self.path.to_string_lossy().into_owned(),
            checksum: self.checksum,
        }
    }

    /// The full path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The checksum of the file's contents, or 0 when not computed.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Compute the checksum of the given file's contents.
    ///
    /// The file is read in 1 MiB chunks and the handle is released on
    /// every exit path. The result is deterministic for identical file
    /// bytes; any change to the contents changes it with high
    /// probability.
    pub fn compute_checksum(path: &Path) -> io::Result<u64> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break
            }
            hasher.update(&buffer[..n]);
        }

        let digest = hasher.finalize();
        // SANITY: A BLAKE3 digest always has more than eight bytes.
        let bytes = <[u8; 8]>::try_from(&digest.as_bytes()[..8]).unwrap();
        Ok(u64::from_le_bytes(bytes))
    }
}

impl PartialEq for FileName {
    fn eq(&self, other: &FileName) -> bool {
        self.path == other.path
            && (self.checksum == 0 || other.checksum == 0 || self.checksum == other.checksum)
    }
}

impl Eq for FileName {}

impl PartialOrd for FileName {
    fn partial_cmp(&self, other: &FileName) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileName {
    fn cmp(&self, other: &FileName) -> Ordering {
        self.path.cmp(&other.path).then_with(|| {
            // Checksums only order names when both sides have one.
            if self.checksum != 0 && other.checksum != 0 {
                self.checksum.cmp(&other.checksum)
            } else {
                Ordering::Equal
            }
        })
    }
}

impl Hash for FileName {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        // The path alone keeps the hash consistent with equality, which
        // disregards a zero checksum on either side.
        self.path.hash(state);
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
