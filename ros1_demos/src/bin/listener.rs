//! Subscribes to `/chatter` and logs every `std_msgs/String` received.

use ros1_demos::StringMsg;
use roslibrust_ros1::NodeHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_owned());
    let nh = NodeHandle::new(&master_uri, "/listener").await?;
    let mut subscriber = nh.subscribe::<StringMsg>("/chatter", 10).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::warn!("ctrl-c received, shutting down");
                break;
            }
            msg = subscriber.next() => {
                match msg {
                    Some(Ok(msg)) => log::info!("[/listener] got: {}", msg.data),
                    Some(Err(e)) => log::warn!("deserialize error: {e}"),
                    None => {
                        log::warn!("publisher connection closed");
                        break;
                    }
                }
            }
        }
    }

    nh.shutdown().await?;
    Ok(())
}
