//! Credential format constants

/// Separator between refresh token, project id and managed project id in
/// the opaque refresh string.
pub const REFRESH_PARTS_DELIMITER: char = '|';

/// Credential type tag carried by every bootstrap credential.
pub const OAUTH_CREDENTIAL_TYPE: &str = "oauth";
