use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::entity::prelude::*;

use crate::error::{ReminderError, ReminderResult};
use crate::models::{
    Channel, ChannelRecord, ChannelSettings, ChannelType, NewChannel, Verification,
};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_by: i64,
    #[sea_orm(column_name = "type")]
    pub channel_type: ChannelType,
    pub settings: Json,
    pub created_at: DateTimeUtc,
    pub verification_token: Option<String>,
    pub verified_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Channel {
    type Error = ReminderError;

    fn try_from(model: Model) -> ReminderResult<Self> {
        let settings: ChannelSettings = serde_json::from_value(model.settings)?;
        if settings.channel_type() != model.channel_type {
            return Err(ReminderError::Internal(format!(
                "channel {} has type {} but {} settings",
                model.id,
                model.channel_type,
                settings.channel_type()
            )));
        }

        // verified_at wins if both are somehow present
        let verification = match (model.verified_at, model.verification_token) {
            (Some(at), _) => Verification::Verified { at },
            (None, Some(token)) => Verification::Pending { token },
            (None, None) => {
                return Err(ReminderError::Internal(format!(
                    "channel {} has neither a verification token nor a verification time",
                    model.id
                )));
            }
        };

        Ok(Channel {
            id: model.id,
            created_by: model.created_by,
            settings,
            created_at: model.created_at,
            verification,
        })
    }
}

impl From<Model> for ChannelRecord {
    fn from(model: Model) -> Self {
        let id = model.id;
        match Channel::try_from(model) {
            Ok(channel) => ChannelRecord::Valid(channel),
            Err(e) => ChannelRecord::Undecodable {
                id,
                reason: e.to_string(),
            },
        }
    }
}

/// `(verification_token, verified_at)` column values.
pub(crate) fn verification_columns(
    verification: &Verification,
) -> (Option<String>, Option<DateTimeUtc>) {
    match verification {
        Verification::Pending { token } => (Some(token.clone()), None),
        Verification::Verified { at } => (None, Some(*at)),
    }
}

impl ActiveModel {
    pub fn from_new(input: &NewChannel, created_at: DateTimeUtc) -> ReminderResult<Self> {
        let (verification_token, verified_at) = verification_columns(&input.verification);
        Ok(ActiveModel {
            id: NotSet,
            created_by: Set(input.created_by),
            channel_type: Set(input.settings.channel_type()),
            settings: Set(serde_json::to_value(&input.settings)?),
            created_at: Set(created_at),
            verification_token: Set(verification_token),
            verified_at: Set(verified_at),
        })
    }
}
