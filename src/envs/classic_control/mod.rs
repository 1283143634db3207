pub mod cart_pole;
pub mod mountain_car_continuous;

pub use cart_pole::CartPoleEnv;
pub use mountain_car_continuous::MountainCarContinuousEnv;
