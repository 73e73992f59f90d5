pub mod m202606010001_create_organizations;
pub mod m202606010002_create_users;
pub mod m202606010003_create_modules;
pub mod m202606010004_create_user_module_roles;
pub mod m202606010005_create_attendance;
pub mod m202606010006_create_anomaly_events;
