use sea_orm_migration::{prelude::*, schema::*};

use crate::m20261001_000000_create_users::Users;
use crate::m20261001_000001_create_channels::Channels;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reminders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reminders::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(big_integer(Reminders::CreatedBy))
                    .col(timestamp_with_time_zone(Reminders::At))
                    .col(integer_null(Reminders::EveryCount))
                    .col(string_len_null(Reminders::EveryPeriod, 8))
                    .col(text(Reminders::Body))
                    .col(string_len(Reminders::Status, 24))
                    .col(
                        timestamp_with_time_zone(Reminders::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(Reminders::ScheduledAt))
                    .col(timestamp_with_time_zone_null(Reminders::SentAt))
                    .col(timestamp_with_time_zone_null(Reminders::CanceledAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reminders_created_by")
                            .from(Reminders::Table, Reminders::CreatedBy)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r#"
                ALTER TABLE reminders
                    ADD CONSTRAINT chk_reminders_status CHECK (status IN (
                        'created', 'scheduled', 'sending', 'sent_success',
                        'sent_error', 'sent_limit_exceeded', 'canceled'
                    )),
                    ADD CONSTRAINT chk_reminders_every
                        CHECK ((every_count IS NULL) = (every_period IS NULL))
                "#,
            )
            .await?;

        // The sweep filters on (status, at)
        manager
            .create_index(
                Index::create()
                    .name("idx_reminders_status_at")
                    .table(Reminders::Table)
                    .col(Reminders::Status)
                    .col(Reminders::At)
                    .to_owned(),
            )
            .await?;

        // Quota counters filter on owner + status (+ sent_at for monthly)
        manager
            .create_index(
                Index::create()
                    .name("idx_reminders_created_by_status")
                    .table(Reminders::Table)
                    .col(Reminders::CreatedBy)
                    .col(Reminders::Status)
                    .col(Reminders::SentAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ReminderChannels::Table)
                    .if_not_exists()
                    .col(big_integer(ReminderChannels::ReminderId))
                    .col(big_integer(ReminderChannels::ChannelId))
                    .col(integer(ReminderChannels::Position))
                    .primary_key(
                        Index::create()
                            .col(ReminderChannels::ReminderId)
                            .col(ReminderChannels::ChannelId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reminder_channels_reminder_id")
                            .from(ReminderChannels::Table, ReminderChannels::ReminderId)
                            .to(Reminders::Table, Reminders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reminder_channels_channel_id")
                            .from(ReminderChannels::Table, ReminderChannels::ChannelId)
                            .to(Channels::Table, Channels::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReminderChannels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Reminders::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Reminders {
    Table,
    Id,
    CreatedBy,
    At,
    EveryCount,
    EveryPeriod,
    Body,
    Status,
    CreatedAt,
    ScheduledAt,
    SentAt,
    CanceledAt,
}

#[derive(DeriveIden)]
enum ReminderChannels {
    Table,
    ReminderId,
    ChannelId,
    Position,
}
