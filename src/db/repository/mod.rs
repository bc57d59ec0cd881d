pub mod kv;
pub mod session;
pub mod user;
pub mod verification;

pub use kv::KvRepository;
pub use session::SessionRepository;
pub use user::UserRepository;
pub use verification::VerificationRepository;
