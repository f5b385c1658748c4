use rand::Rng;

/// Generate a fresh UUID v4 string for participants and messages.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

const TOKEN_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TOKEN_LEN: usize = 9;

/// Generate a short base-36 room token.
///
/// Room tokens are opaque routing keys; they carry no identity and are
/// created client-side, so a short random string is enough.
pub fn new_room_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}
