pub(crate) mod authenticated_user;
pub(crate) mod bearer_token;
