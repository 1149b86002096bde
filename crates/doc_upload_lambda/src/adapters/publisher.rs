pub trait MessagePublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), String>;
}
