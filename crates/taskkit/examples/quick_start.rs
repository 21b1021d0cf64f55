//! Minimal host loop: fire a few tasks and pump the main scheduler until
//! they finish.

use std::time::Duration;

use taskkit::{delay_frames, wait_for, when_all2, Task, TaskSystemConfig};

fn when_all_example() -> Task<()> {
    Task::spawn(async {
        println!("when_all start");

        let first = Task::spawn(async {
            println!("  first start");
            wait_for(Duration::from_millis(500), None).await.unwrap();
            println!("  first end");
        });
        let second = Task::spawn(async {
            println!("  second start");
            wait_for(Duration::from_millis(300), None).await.unwrap();
            println!("  second end");
        });

        when_all2(first, second).await;
        println!("when_all end, both tasks completed");
    })
}

fn delay_frame_example() -> Task<()> {
    Task::spawn(async {
        for i in 0..5 {
            println!("frame task iteration {i}");
            delay_frames(1, None).await.unwrap();
        }
        println!("frame task end");
    })
}

fn main() {
    taskkit::initialize(TaskSystemConfig::default());

    let ids = taskkit::main_thread_scheduler_ids();
    {
        let id = ids[0];
        let _activation = taskkit::activate_scheduler(id);

        delay_frame_example().forget();
        when_all_example().forget();
        println!("pending tasks: {}", taskkit::pending_task_count(id));

        while taskkit::pending_task_count(id) > 0 {
            taskkit::update_activated_scheduler();
            std::thread::sleep(Duration::from_millis(16));
        }
        println!("all tasks completed");
    }

    taskkit::shutdown();
}
