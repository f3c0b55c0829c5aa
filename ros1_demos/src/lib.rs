//! Hand-written message types for the talker/listener demos: exactly the
//! structs a `.msg` code generator would have produced for
//! `std_msgs/String` and `geometry_msgs/Point`.

use roslibrust_common::RosMessageType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

impl RosMessageType for StringMsg {
    const ROS_TYPE_NAME: &'static str = "std_msgs/String";
    const MD5SUM: &'static str = "992ce8a1687cec8c8bd883ec73ca41d1";
    const DEFINITION: &'static str = "string data\n";
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl RosMessageType for Point {
    const ROS_TYPE_NAME: &'static str = "geometry_msgs/Point";
    const MD5SUM: &'static str = "4a842b65f413084dc2b10fb45aa1d33f";
    const DEFINITION: &'static str = "float64 x\nfloat64 y\nfloat64 z\n";
}
