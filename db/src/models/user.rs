use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, ColumnTrait, QueryFilter, Set};

use crate::models::user_module_role::{
    Column as RoleColumn, Entity as RoleEntity, Role,
};

/// Represents a user in the `users` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Tenant the user belongs to.
    pub organization_id: i64,
    /// Unique student/staff number.
    pub username: String,
    pub email: String,
    /// Securely hashed password string.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the user has admin privileges.
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrganizationId",
        to = "super::organization::Column::Id"
    )]
    Organization,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        organization_id: i64,
        username: &str,
        email: &str,
        password: &str,
        admin: bool,
    ) -> Result<Self, DbErr> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DbErr::Custom(format!("Password hashing failed: {e}")))?
            .to_string();

        let now = Utc::now();
        ActiveModel {
            organization_id: Set(organization_id),
            username: Set(username.to_owned()),
            email: Set(email.to_owned()),
            password_hash: Set(hash),
            admin: Set(admin),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Looks up a user by username and verifies the password.
    pub async fn verify_credentials(
        db: &DatabaseConnection,
        username: &str,
        password: &str,
    ) -> Result<Option<Self>, DbErr> {
        let Some(user) = Entity::find()
            .filter(Column::Username.eq(username))
            .one(db)
            .await?
        else {
            return Ok(None);
        };

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| DbErr::Custom(format!("Corrupt password hash: {e}")))?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
        {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// True when the user holds `role` in the given module.
    pub async fn is_in_role(
        db: &DatabaseConnection,
        user_id: i64,
        module_id: i64,
        role: Role,
    ) -> Result<bool, DbErr> {
        let found = RoleEntity::find()
            .filter(RoleColumn::UserId.eq(user_id))
            .filter(RoleColumn::ModuleId.eq(module_id))
            .filter(RoleColumn::Role.eq(role))
            .one(db)
            .await?;
        Ok(found.is_some())
    }
}
