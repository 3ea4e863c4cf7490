mod parser;
mod types;

pub use parser::{erp_schema, parse_schema, parse_schema_str};
pub use types::{
    FieldFormat, IdDefinition, SchemaDefinition, SoftDelete, TableDefinition, TimestampColumns,
    NOW_TOKEN,
};

// Table names used directly by services.
pub const STUDENTS: &str = "Students";
pub const ADMISSIONS: &str = "Admissions";
pub const USERS: &str = "Users";
pub const FEE_MASTER: &str = "FeeMaster";
pub const TRANSACTIONS: &str = "Transactions";
pub const RECEIPTS: &str = "Receipts";
pub const HOSTEL_ROOMS: &str = "HostelRooms";
pub const HOSTEL_ALLOCATIONS: &str = "HostelAllocations";
pub const COURSES: &str = "Courses";
pub const ENROLLMENTS: &str = "Enrollments";
pub const EXAMS: &str = "Exams";
pub const MARKS: &str = "Marks";
pub const LIBRARY_ITEMS: &str = "LibraryItems";
pub const BORROW_HISTORY: &str = "BorrowHistory";
pub const AUDIT_LOG: &str = "AuditLog";
pub const CONFIG: &str = "Config";
pub const NOTIFICATIONS: &str = "Notifications";
pub const FILES: &str = "Files";
