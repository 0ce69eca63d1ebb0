use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this crate can report.
///
/// All errors are fatal for a patch run: nothing is retried and no partial output is
/// produced. The variants fall into two groups.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::NotSupported`] - Unsupported file layout or feature
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
/// - [`Error::FileError`] - Filesystem I/O errors while reading
///
/// ## Patch Errors
/// - [`Error::InputNotFound`] - The source assembly does not exist
/// - [`Error::TypeNotFound`] / [`Error::MethodNotFound`] - The target member is absent or ambiguous
/// - [`Error::AnchorNotFound`] / [`Error::AnchorAmbiguous`] - A locator predicate did not match exactly once
/// - [`Error::UnexpectedAnchorShape`] - An anchor exists but is not the expected instruction
/// - [`Error::UnsafeInsertionPoint`] - Control flow enters at the injection location
/// - [`Error::WriteFailure`] - The patched assembly could not be persisted
///
/// # Examples
///
/// ```rust,no_run
/// use cilpatch::{patch_file, Error, PatchConfig, PeStore};
/// use std::path::Path;
///
/// let result = patch_file(
///     &PeStore,
///     Path::new("Assembly-CSharp.dll"),
///     Path::new("Assembly-CSharp.mod.dll"),
///     &PatchConfig::default(),
/// );
///
/// match result {
///     Ok(report) => println!("array resized to {}", report.array_size),
///     Err(Error::AnchorAmbiguous { predicate, matches }) => {
///         eprintln!("{predicate} matched {matches} times, unsupported game version");
///     }
///     Err(e) => eprintln!("patch failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Image parsing errors
    /// The file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected
    /// for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This file type or layout is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error while reading input.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    // Patch errors
    /// The source assembly path does not exist.
    #[error("Input assembly not found - {}", .0.display())]
    InputNotFound(PathBuf),

    /// No top-level type, or more than one, carries the requested name.
    #[error("Expected exactly one type named '{name}', found {matches}")]
    TypeNotFound {
        /// The requested type name
        name: String,
        /// How many types matched
        matches: usize,
    },

    /// No method with a body, or more than one, carries the requested name.
    #[error("Expected exactly one method '{type_name}::{name}' with a body, found {matches}")]
    MethodNotFound {
        /// The type that was searched
        type_name: String,
        /// The requested method name
        name: String,
        /// How many methods matched
        matches: usize,
    },

    /// No instruction satisfied a locator predicate.
    #[error("No instruction matches {predicate}")]
    AnchorNotFound {
        /// Description of the predicate that failed
        predicate: String,
    },

    /// More than one instruction satisfied a locator predicate.
    #[error("{matches} instructions match {predicate}, expected exactly one")]
    AnchorAmbiguous {
        /// Description of the predicate that failed
        predicate: String,
        /// How many instructions matched
        matches: usize,
    },

    /// A located anchor is not the instruction kind the patch rewrites.
    #[error("Unexpected anchor shape - expected {expected}, found '{found}'")]
    UnexpectedAnchorShape {
        /// The instruction kind that was expected
        expected: &'static str,
        /// The instruction that was found
        found: String,
    },

    /// Control flow enters the method at the injection location, so inserted
    /// instructions would be skipped on some path.
    #[error("Unsafe insertion point - {0}")]
    UnsafeInsertionPoint(String),

    /// The patched assembly could not be persisted.
    #[error("Failed to write {} - {source}", .path.display())]
    WriteFailure {
        /// The target path
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}
