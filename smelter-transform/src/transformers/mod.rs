pub mod commit;
pub mod doc_change;
pub mod issue;
pub mod pull_request;
