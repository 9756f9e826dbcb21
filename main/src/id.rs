use mockall::automock;
use uuid::Uuid;

/// Source of the opaque candidate identities consumed by connectivity checks.
#[automock]
pub trait IdGenerator {
    fn generate(&self) -> String;
}

pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
