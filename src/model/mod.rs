pub mod chat_record;
pub mod generation;
