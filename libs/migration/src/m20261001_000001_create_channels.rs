use sea_orm_migration::{prelude::*, schema::*};

use crate::m20261001_000000_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Channels::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(big_integer(Channels::CreatedBy))
                    .col(string_len(Channels::Type, 16))
                    .col(json_binary(Channels::Settings))
                    .col(
                        timestamp_with_time_zone(Channels::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(string_null(Channels::VerificationToken))
                    .col(timestamp_with_time_zone_null(Channels::VerifiedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_channels_created_by")
                            .from(Channels::Table, Channels::CreatedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "ALTER TABLE channels ADD CONSTRAINT chk_channels_type \
                 CHECK (type IN ('email', 'telegram', 'websocket', 'internal'))",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channels_created_by")
                    .table(Channels::Table)
                    .col(Channels::CreatedBy)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Channels {
    Table,
    Id,
    CreatedBy,
    Type,
    Settings,
    CreatedAt,
    VerificationToken,
    VerifiedAt,
}
