//! Publishes an incrementing `std_msgs/String` on `/chatter`, the canonical
//! ROS1 smoke test.

use ros1_demos::StringMsg;
use roslibrust_ros1::NodeHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let master_uri =
        std::env::var("ROS_MASTER_URI").unwrap_or_else(|_| "http://localhost:11311".to_owned());
    let nh = NodeHandle::new(&master_uri, "/talker").await?;
    let publisher = nh.advertise::<StringMsg>("/chatter", 10, false).await?;

    let mut count: u64 = 0;
    loop {
        let msg = StringMsg {
            data: format!("hello world {count}"),
        };
        publisher.publish(&msg).await?;
        log::info!("published: {}", msg.data);
        count += 1;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
