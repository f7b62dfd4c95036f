pub mod batches;
pub mod cifar;
pub mod configs;
pub mod evaluate;
pub mod logging;
pub mod plot;
pub mod resnet;
pub mod runner;
pub mod train;
