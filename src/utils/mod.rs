pub mod clock;
pub mod ip;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ip::{IpVersion, ip_in_cidr, is_private_or_local, parse_ip};
pub use retry::{RetryPolicy, with_retry};
