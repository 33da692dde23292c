use std::sync::Arc;

use courier::sender::{DemoSender, Sender};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    courier::run()
        .sender_factory(|config| -> Arc<dyn Sender> {
            Arc::new(DemoSender::new(config.demo_success_rate()))
        })
        .start()
        .await
}
