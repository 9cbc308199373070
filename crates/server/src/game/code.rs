// Join-code generation for game sessions.

use rand::Rng;

/// Alphabet for session codes. Uppercase alphanumerics only so codes are
/// easy to read out loud and type on a phone.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const CODE_LENGTH: usize = 6;

/// How many random codes to try before giving up on uniqueness.
pub const MAX_CODE_ATTEMPTS: usize = 10;

/// Generate a random 6-character session code.
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Whether `code` is a well-formed session code.
pub fn is_valid_session_code(code: &str) -> bool {
    code.len() == CODE_LENGTH
        && code.bytes().all(|byte| CODE_ALPHABET.contains(&byte))
}
