//! The bot's schema history. New units are scaffolded with `strata new`
//! and must be added to [`registry`].

mod m20241201_000001_initial_tables;
mod m20241201_000002_add_user_columns;
mod m20241201_000003_add_invitations;
mod m20250825_121500_restrict_default_access;

pub use m20241201_000001_initial_tables::InitialTablesMigration;
pub use m20241201_000002_add_user_columns::AddUserColumnsMigration;
pub use m20241201_000003_add_invitations::AddInvitationsMigration;
pub use m20250825_121500_restrict_default_access::RestrictDefaultAccessMigration;

use super::MigrationSource;

/// Every migration unit shipped with this build.
pub fn registry() -> MigrationSource {
    MigrationSource::builder()
        .register(InitialTablesMigration)
        .register(AddUserColumnsMigration)
        .register(AddInvitationsMigration)
        .register(RestrictDefaultAccessMigration)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_well_formed() {
        let source = registry();
        let units = source.discover().unwrap();
        assert_eq!(units.len(), source.len());
        assert_eq!(
            units.iter().map(|u| u.version()).collect::<Vec<_>>(),
            vec![
                "20241201_000001",
                "20241201_000002",
                "20241201_000003",
                "20250825_121500",
            ]
        );
    }
}
