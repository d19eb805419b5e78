//! Note access rule.
//!
//! A principal may read, edit, delete, share or join the live session of
//! a note iff it is an administrator, the note's owner, or one of its
//! collaborators. There is no separate read-only grant.

use crate::types::{Principal, UserId};

/// Ownership facts needed to evaluate access to a note.
#[derive(Debug, Clone, Copy)]
pub struct NoteAcl<'a> {
    pub owner_id: &'a UserId,
    pub collaborator_ids: &'a [UserId],
}

pub fn can_access(principal: &Principal, acl: NoteAcl<'_>) -> bool {
    principal.is_admin()
        || principal.id == *acl.owner_id
        || acl.collaborator_ids.contains(&principal.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, SubscriptionTier};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn principal(id: UserId, role: Role) -> Principal {
        Principal {
            id,
            role,
            subscription: SubscriptionTier::Premium,
        }
    }

    #[test]
    fn test_owner_has_access() {
        let owner = UserId::new();
        let acl = NoteAcl {
            owner_id: &owner,
            collaborator_ids: &[],
        };
        assert!(can_access(&principal(owner, Role::Standard), acl));
    }

    #[test]
    fn test_stranger_denied() {
        let owner = UserId::new();
        let acl = NoteAcl {
            owner_id: &owner,
            collaborator_ids: &[UserId::new()],
        };
        assert!(!can_access(&principal(UserId::new(), Role::Standard), acl));
        assert!(!can_access(&principal(UserId::new(), Role::Guest), acl));
    }

    #[test]
    fn test_admin_bypasses_ownership() {
        let owner = UserId::new();
        let acl = NoteAcl {
            owner_id: &owner,
            collaborator_ids: &[],
        };
        assert!(can_access(&principal(UserId::new(), Role::Admin), acl));
    }

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Admin), Just(Role::Standard), Just(Role::Guest)]
    }

    fn arb_user(pool: u8) -> impl Strategy<Value = UserId> {
        (0..pool).prop_map(|n| UserId(Uuid::from_u128(n as u128 + 1)))
    }

    proptest! {
        #[test]
        fn test_prop_access_iff_admin_owner_or_collaborator(
            actor in arb_user(8),
            role in arb_role(),
            owner in arb_user(8),
            collaborators in proptest::collection::vec(arb_user(8), 0..5),
        ) {
            let p = principal(actor, role);
            let acl = NoteAcl { owner_id: &owner, collaborator_ids: &collaborators };
            let expected = role == Role::Admin
                || actor == owner
                || collaborators.iter().any(|c| *c == actor);
            prop_assert_eq!(can_access(&p, acl), expected);
        }
    }
}
