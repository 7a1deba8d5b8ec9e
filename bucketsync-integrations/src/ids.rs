pub const APP_ID_BASE: &str = "io.bucketsync";

pub const DBUS_NAME_SYNC: &str = "io.bucketsync.Sync1";
pub const DBUS_INTERFACE_SYNC: &str = "io.bucketsync.Sync1";
pub const DBUS_OBJECT_PATH_SYNC: &str = "/io/bucketsync/Sync1";

pub const DBUS_ERROR_NOT_FOUND: &str = "io.bucketsync.Sync1.Error.NotFound";
pub const DBUS_ERROR_INVALID_PATH: &str = "io.bucketsync.Sync1.Error.InvalidPath";
pub const DBUS_ERROR_FAILED: &str = "io.bucketsync.Sync1.Error.Failed";

pub const STATUS_SYNCHRONIZING: &str = "synchronizing";
pub const STATUS_IDLE: &str = "idle";
