use uuid::Uuid;

/// Distinguishes the kind of entity an id was generated for, purely for a
/// readable prefix; ids remain globally unique and creation-time sortable
/// regardless of kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Task,
    Session,
    Evidence,
    Event,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            IdKind::Task => "task",
            IdKind::Session => "sess",
            IdKind::Evidence => "evid",
            IdKind::Event => "evt",
        }
    }
}

/// Generate a new id, time-prefixed and sortable by creation order via
/// UUIDv7's embedded timestamp.
pub fn new_id(kind: IdKind) -> String {
    format!("{}_{}", kind.prefix(), Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_id(IdKind::Task);
        let b = new_id(IdKind::Task);
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
    }

    #[test]
    fn ids_sort_by_creation_order() {
        let a = new_id(IdKind::Task);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id(IdKind::Task);
        assert!(a < b);
    }
}
