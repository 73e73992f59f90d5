use chrono::{DateTime, Utc};
use ipnet::IpNet;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelTrait, Set};
use std::net::IpAddr;

/// Tenant row. Engine tunables live here so each institution can adjust the
/// verification policy without a redeploy.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "organizations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub confidence_threshold: i32,
    /// Comma-separated CIDR list of on-campus networks, e.g. "10.0.0.0/8,2001:db8::/32".
    pub trusted_cidrs: Option<String>,
    pub reverify_sample_percent: i32,
    pub reverify_slot_capacity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    Users,
    #[sea_orm(has_many = "super::module::Entity")]
    Modules,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::module::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Modules.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        name: &str,
        trusted_cidrs: Option<&str>,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            name: Set(name.to_owned()),
            confidence_threshold: Set(common::config::confidence_threshold()),
            trusted_cidrs: Set(trusted_cidrs.map(|s| s.to_owned())),
            reverify_sample_percent: Set(common::config::reverify_sample_percent()),
            reverify_slot_capacity: Set(common::config::reverify_slot_capacity()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    /// Parses the tenant's trusted CIDR list; malformed entries are skipped.
    pub fn trusted_networks(&self) -> Vec<IpNet> {
        self.trusted_cidrs
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(|s| {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                match s.parse::<IpNet>() {
                    Ok(net) => Some(net),
                    Err(_) => {
                        tracing::warn!(cidr = s, org_id = self.id, "skipping malformed trusted CIDR");
                        None
                    }
                }
            })
            .collect()
    }

    /// True when `ip` falls inside any trusted network.
    pub fn is_trusted_ip(&self, ip: IpAddr) -> bool {
        self.trusted_networks().iter().any(|net| net.contains(&ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(cidrs: Option<&str>) -> Model {
        Model {
            id: 1,
            name: "Test University".into(),
            confidence_threshold: 70,
            trusted_cidrs: cidrs.map(String::from),
            reverify_sample_percent: 30,
            reverify_slot_capacity: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn trusted_ip_matches_cidr() {
        let o = org(Some("10.0.0.0/8, 192.168.1.0/24"));
        assert!(o.is_trusted_ip("10.4.2.1".parse().unwrap()));
        assert!(o.is_trusted_ip("192.168.1.77".parse().unwrap()));
        assert!(!o.is_trusted_ip("192.168.2.1".parse().unwrap()));
        assert!(!o.is_trusted_ip("203.0.113.5".parse().unwrap()));
    }

    #[test]
    fn malformed_cidrs_are_skipped() {
        let o = org(Some("not-a-cidr,10.0.0.0/8"));
        assert_eq!(o.trusted_networks().len(), 1);
    }

    #[test]
    fn empty_list_trusts_nothing() {
        let o = org(None);
        assert!(!o.is_trusted_ip("10.0.0.1".parse().unwrap()));
    }
}
