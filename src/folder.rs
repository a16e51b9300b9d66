//! Folder hierarchy and disposal ("trash") folder discovery.
//!
//! IMAP `LIST` returns a flat list of full names. [`FolderNode::tree`] rebuilds
//! the hierarchy from it, and [`locate_disposal_folder`] walks that tree to find
//! where consumed messages should go.
//!
//! # Example
//!
//! ```
//! use mailcode::folder::{locate_disposal_folder, FolderListing, FolderNode};
//!
//! let listing = vec![
//!     FolderListing::new("INBOX", Some("/"), &[]),
//!     FolderListing::new("[Gmail]", Some("/"), &["\\Noselect"]),
//!     FolderListing::new("[Gmail]/Bin", Some("/"), &["\\Trash"]),
//! ];
//!
//! let tree = FolderNode::tree(&listing);
//! assert_eq!(locate_disposal_folder(&tree).as_deref(), Some("[Gmail]/Bin"));
//! ```

use std::collections::BTreeSet;

/// Disposal folder used when discovery finds nothing or fails.
pub const DEFAULT_DISPOSAL_FOLDER: &str = "[Gmail]/Trash";

/// Special-use attribute that marks the provider's trash folder.
pub const TRASH_ATTRIBUTE: &str = "\\Trash";

/// Lowercase fragments that identify a trash folder by name.
const TRASH_NAME_HINTS: [&str; 5] = [
    "trash",
    "papelera",
    "[gmail]/trash",
    "[google mail]/trash",
    "[gmail]/papelera",
];

const DEFAULT_DELIMITER: &str = "/";

/// One entry of a folder listing, as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderListing {
    /// Fully qualified folder name.
    pub name: String,
    /// Hierarchy delimiter, if the server uses one.
    pub delimiter: Option<String>,
    /// Protocol attributes such as `\Noselect` or `\Trash`.
    pub attributes: Vec<String>,
}

impl FolderListing {
    /// Convenience constructor.
    #[must_use]
    pub fn new(name: &str, delimiter: Option<&str>, attributes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            delimiter: delimiter.map(str::to_string),
            attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// A folder and its children. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// Name relative to the parent.
    pub name: String,
    /// Delimiter separating this folder's name from its children's.
    pub delimiter: Option<String>,
    /// Protocol attributes.
    pub attributes: BTreeSet<String>,
    /// Children in provider order.
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    fn new(name: &str, delimiter: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            delimiter: delimiter.map(str::to_string),
            attributes: BTreeSet::new(),
            children: Vec::new(),
        }
    }

    /// Returns `true` if this folder carries `attribute` (ASCII case-insensitive).
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case(attribute))
    }

    /// Rebuilds the folder tree from a flat listing.
    ///
    /// Each name is split on its delimiter. Ancestors missing from the listing
    /// are created without attributes. Sibling order follows the order in which
    /// folders first appear.
    #[must_use]
    pub fn tree(listing: &[FolderListing]) -> Vec<FolderNode> {
        let mut roots: Vec<FolderNode> = Vec::new();

        for entry in listing {
            let delimiter = entry.delimiter.as_deref().filter(|d| !d.is_empty());
            let segments: Vec<&str> = match delimiter {
                Some(d) => entry.name.split(d).collect(),
                None => vec![entry.name.as_str()],
            };

            let leaf = segments.len() - 1;

            let mut level = &mut roots;
            for (depth, segment) in segments.into_iter().enumerate() {
                let index = match level.iter().position(|n| n.name == segment) {
                    Some(index) => index,
                    None => {
                        level.push(FolderNode::new(segment, delimiter));
                        level.len() - 1
                    }
                };
                let current = &mut level[index];
                if current.delimiter.is_none() {
                    current.delimiter = delimiter.map(str::to_string);
                }
                if depth == leaf {
                    current.attributes.extend(entry.attributes.iter().cloned());
                }
                level = &mut current.children;
            }
        }

        roots
    }
}

/// Walks the tree in pre-order, yielding each folder with its fully qualified name.
fn preorder(roots: &[FolderNode]) -> impl Iterator<Item = (String, &FolderNode)> {
    let mut stack: Vec<(String, &FolderNode)> = roots
        .iter()
        .rev()
        .map(|node| (node.name.clone(), node))
        .collect();

    std::iter::from_fn(move || {
        let (full_name, node) = stack.pop()?;
        let delimiter = node.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER);
        for child in node.children.iter().rev() {
            stack.push((format!("{full_name}{delimiter}{}", child.name), child));
        }
        Some((full_name, node))
    })
}

fn looks_like_trash(full_name: &str) -> bool {
    let lower = full_name.to_lowercase();
    TRASH_NAME_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Finds the best disposal folder in a folder tree.
///
/// A folder carrying the [`TRASH_ATTRIBUTE`] wins over any name match, wherever
/// it sits in the tree. Otherwise the first folder, in pre-order, whose fully
/// qualified name contains a known trash name (case-insensitive) is returned.
#[must_use]
pub fn locate_disposal_folder(roots: &[FolderNode]) -> Option<String> {
    preorder(roots)
        .find(|(_, node)| node.has_attribute(TRASH_ATTRIBUTE))
        .or_else(|| preorder(roots).find(|(full_name, _)| looks_like_trash(full_name)))
        .map(|(full_name, _)| full_name)
}

/// [`locate_disposal_folder`], falling back to [`DEFAULT_DISPOSAL_FOLDER`].
#[must_use]
pub fn disposal_folder_or_default(roots: &[FolderNode]) -> String {
    locate_disposal_folder(roots).unwrap_or_else(|| DEFAULT_DISPOSAL_FOLDER.to_string())
}
