mod chessboard;
mod fast;
mod matching;
mod orb;
mod responses;
mod subpix;

pub use chessboard::*;
pub use fast::*;
pub use matching::*;
pub use orb::*;
pub use responses::*;
pub use subpix::*;
