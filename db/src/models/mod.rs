pub mod anomaly_event;
pub mod attendance_record;
pub mod attendance_session;
pub mod module;
pub mod organization;
pub mod user;
pub mod user_module_role;

pub use anomaly_event::Entity as AnomalyEvent;
pub use attendance_record::Entity as AttendanceRecord;
pub use attendance_session::Entity as AttendanceSession;
pub use module::Entity as Module;
pub use organization::Entity as Organization;
pub use user::Entity as User;
pub use user_module_role::Entity as UserModuleRole;
