pub const PATH_STATUS: &str = "/status.json";

pub const PATH_OTA_UPDATE: &str = "/OTAupdate";
pub const PATH_OTA_STATUS: &str = "/OTAstatus";
pub const OTA_STATUS_QUERY: &str = "ota_update_status";
pub const OTA_UPLOAD_FIELD: &str = "file";

pub const PATH_MANUAL_GET: &str = "/get_manual_config.json";
pub const PATH_MANUAL_SET: &str = "/manual_pwm.json";

pub const PATH_AUTO_GET: &str = "/auto_config.json";
pub const PATH_AUTO_SET: &str = "/set_auto_config.json";

pub const PATH_PROGRAM_GET: &str = "/get_program.json";
pub const PATH_PROGRAM_SET: &str = "/set_program.json";
pub const PATH_PROGRAM_ERASE: &str = "/erase_program.json";

pub const PATH_PROGRAM_SLOT_GET: &str = "/program_slot_get.json";
pub const PATH_PROGRAM_SLOT_SET: &str = "/program_slot_set.json";
pub const PATH_PROGRAM_SLOT_ERASE: &str = "/program_slot_erase.json";

pub const PATH_WIFI_CONNECT: &str = "/wifiConnect.json";
pub const PATH_WIFI_STATUS: &str = "/wifiConnectStatus";
