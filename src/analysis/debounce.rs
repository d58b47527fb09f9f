// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 按帧去抖的类别标志 (锥桶 / 救援)

/// 类别在连续 `confirm_frames` 帧出现后确认, 缺席一帧立即清零
#[derive(Clone, Debug)]
pub struct ClassDebouncer {
    class_name: &'static str,
    confirm_frames: u32,
    count: u32,
    confirmed: bool,
}

impl ClassDebouncer {
    pub fn new(class_name: &'static str, confirm_frames: u32) -> Self {
        Self {
            class_name,
            confirm_frames,
            count: 0,
            confirmed: false,
        }
    }

    /// 每帧调用一次, 返回确认状态
    pub fn observe(&mut self, present: bool) -> bool {
        if present {
            self.count = self.count.saturating_add(1);
            if self.count >= self.confirm_frames {
                self.confirmed = true;
            }
        } else {
            self.count = 0;
            self.confirmed = false;
        }
        self.confirmed
    }

    /// 在本帧类别集合中查找
    pub fn observe_classes<'a, I>(&mut self, classes: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present = classes.into_iter().any(|c| c == self.class_name);
        self.observe(present)
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.confirmed = false;
    }
}
