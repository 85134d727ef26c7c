/// Shared kernel for the cluster components: members and wire messages
pub(crate) mod member;
pub(crate) mod messages;
