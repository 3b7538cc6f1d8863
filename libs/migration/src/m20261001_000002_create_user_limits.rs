use sea_orm_migration::{prelude::*, schema::*};

use crate::m20261001_000000_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // NULL means unlimited
        manager
            .create_table(
                Table::create()
                    .table(UserLimits::Table)
                    .if_not_exists()
                    .col(big_integer(UserLimits::UserId).primary_key())
                    .col(integer_null(UserLimits::EmailChannelCount))
                    .col(integer_null(UserLimits::TelegramChannelCount))
                    .col(integer_null(UserLimits::ActiveReminderCount))
                    .col(integer_null(UserLimits::MonthlySentReminderCount))
                    .col(double_null(UserLimits::ReminderEveryPerDayCount))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_limits_user_id")
                            .from(UserLimits::Table, UserLimits::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserLimits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserLimits {
    Table,
    UserId,
    EmailChannelCount,
    TelegramChannelCount,
    ActiveReminderCount,
    MonthlySentReminderCount,
    ReminderEveryPerDayCount,
}
