use sha1::{Digest, Sha1};
use sha2::Sha256;

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_authentication_methods_native_password_authentication.html
//
// scramble = SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))
pub fn scramble_native(nonce: &[u8], password: &[u8]) -> [u8; 20] {
  let hashed = Sha1::digest(password);
  let double_hashed = Sha1::digest(hashed);

  let mut salted = Sha1::new();
  salted.update(nonce);
  salted.update(double_hashed);

  let mut out = [0_u8; 20];
  for (o, (a, b)) in out.iter_mut().zip(hashed.iter().zip(salted.finalize().iter())) {
    *o = a ^ b;
  }
  out
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/page_caching_sha2_authentication_exchanges.html
//
// scramble = SHA256(password) XOR SHA256(SHA256(SHA256(password)) + nonce)
pub fn scramble_sha256(nonce: &[u8], password: &[u8]) -> [u8; 32] {
  let hashed = Sha256::digest(password);
  let double_hashed = Sha256::digest(hashed);

  let mut salted = Sha256::new();
  salted.update(double_hashed);
  salted.update(nonce);

  let mut out = [0_u8; 32];
  for (o, (a, b)) in out.iter_mut().zip(hashed.iter().zip(salted.finalize().iter())) {
    *o = a ^ b;
  }
  out
}
