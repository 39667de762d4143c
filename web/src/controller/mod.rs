use serde::Serialize;
pub(crate) mod health_check_controller;
pub(crate) mod hive_command_controller;
pub(crate) mod system_controller;

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}
