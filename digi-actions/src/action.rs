//! The action capability interface.

use digi_core::{EventContext, EventStore, Result};
use std::fmt::Write as _;
use std::sync::Arc;

/// Variant tag of an action, used for diagnostics and tree rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Sequence,
    Subdetector,
    Locked,
    Synchronize,
    Splitter,
    Combine,
    ProcessorChain,
    StoreDump,
    Custom,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sequence => "sequence",
            Self::Subdetector => "subdetector",
            Self::Locked => "locked",
            Self::Synchronize => "synchronize",
            Self::Splitter => "splitter",
            Self::Combine => "combine",
            Self::ProcessorChain => "processor-chain",
            Self::StoreDump => "store-dump",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Container names an action declares it reads and writes.
///
/// Purely diagnostic: nothing enforces it at run time. A trailing `*` marks a
/// name pattern (e.g. the dynamic outputs of a splitter).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerAccess {
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

impl ContainerAccess {
    /// Merges `other` into `self`, skipping duplicates.
    pub fn merge(&mut self, other: ContainerAccess) {
        for name in other.reads {
            if !self.reads.contains(&name) {
                self.reads.push(name);
            }
        }
        for name in other.writes {
            if !self.writes.contains(&name) {
                self.writes.push(name);
            }
        }
    }

    /// Every declared name, reads first.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.reads.iter().chain(&self.writes).map(String::as_str)
    }
}

/// Unit of work over the event store for one event.
///
/// Every pipeline element (sequences, guards, barriers, splitters, combiners,
/// processor chains) implements this one interface and is composed by
/// ownership: parents own their children as `Box<dyn Action>`.
pub trait Action: Send + Sync {
    /// Name used for logging, diagnostics, and error reports.
    fn name(&self) -> &str;

    /// Variant tag.
    fn kind(&self) -> ActionKind;

    /// Runs the action against the store of `ctx`.
    ///
    /// # Errors
    /// Returns the failure that aborted the action.
    fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()>;

    /// Containers this action itself reads and writes (children excluded).
    fn access(&self) -> ContainerAccess {
        ContainerAccess::default()
    }

    /// Directly owned child actions.
    fn children(&self) -> Vec<&dyn Action> {
        Vec::new()
    }

    /// Short configuration summary for tree rendering.
    fn details(&self) -> String {
        String::new()
    }
}

macro_rules! forward_action {
    ($ptr:ident) => {
        impl<A: Action + ?Sized> Action for $ptr<A> {
            fn name(&self) -> &str {
                (**self).name()
            }

            fn kind(&self) -> ActionKind {
                (**self).kind()
            }

            fn execute(&self, ctx: &EventContext, store: &EventStore) -> Result<()> {
                (**self).execute(ctx, store)
            }

            fn access(&self) -> ContainerAccess {
                (**self).access()
            }

            fn children(&self) -> Vec<&dyn Action> {
                (**self).children()
            }

            fn details(&self) -> String {
                (**self).details()
            }
        }
    };
}

forward_action!(Box);
forward_action!(Arc);

/// Containers declared by `action` and all of its descendants.
pub fn collect_access(action: &dyn Action) -> ContainerAccess {
    let mut access = action.access();
    for child in action.children() {
        access.merge(collect_access(child));
    }
    access
}

/// Renders the action tree, one line per action.
pub fn describe_tree(action: &dyn Action) -> String {
    let mut out = String::new();
    render(action, 0, &mut out);
    out
}

fn render(action: &dyn Action, depth: usize, out: &mut String) {
    let details = action.details();
    let _ = write!(out, "{:indent$}{} '{}'", "", action.kind(), action.name(), indent = depth * 2);
    if !details.is_empty() {
        let _ = write!(out, " [{details}]");
    }
    out.push('\n');
    for child in action.children() {
        render(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, Vec<Box<dyn Action>>);

    impl Action for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> ActionKind {
            ActionKind::Custom
        }

        fn execute(&self, _: &EventContext, _: &EventStore) -> Result<()> {
            Ok(())
        }

        fn access(&self) -> ContainerAccess {
            ContainerAccess {
                reads: vec![format!("{}.in", self.0)],
                writes: vec![format!("{}.out", self.0)],
            }
        }

        fn children(&self) -> Vec<&dyn Action> {
            self.1.iter().map(|c| c.as_ref() as &dyn Action).collect()
        }
    }

    #[test]
    fn test_collect_access_walks_children() {
        let children: Vec<Box<dyn Action>> =
            vec![Box::new(Named("a", vec![])), Box::new(Named("b", vec![]))];
        let tree = Named("root", children);
        let access = collect_access(&tree);
        assert_eq!(access.reads, vec!["root.in", "a.in", "b.in"]);
        assert_eq!(access.writes.len(), 3);
    }

    #[test]
    fn test_describe_tree_indents_children() {
        let children: Vec<Box<dyn Action>> = vec![Box::new(Named("leaf", vec![]))];
        let tree = Named("root", children);
        let text = describe_tree(&tree);
        assert_eq!(text, "custom 'root'\n  custom 'leaf'\n");
    }

    #[test]
    fn test_arc_forwards() {
        let shared: Arc<Named> = Arc::new(Named("shared", vec![]));
        let boxed: Box<dyn Action> = Box::new(shared.clone());
        assert_eq!(boxed.name(), "shared");
        assert_eq!(boxed.access().reads, vec!["shared.in"]);
    }
}
