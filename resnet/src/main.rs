use resnet_cifar10::configs::CIFAR10_CONFIG;
use resnet_cifar10::{logging, runner};


fn main() {
    logging::init();

    println!("");
    println!("======================================");
    println!("=== Training ResNet-18 on CIFAR-10 ===");
    println!("======================================");

    if let Err(err) = runner::run(&CIFAR10_CONFIG) {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}
